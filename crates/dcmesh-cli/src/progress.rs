use dcmesh_core::{RunStatus, StageEvent};
use indicatif::{ProgressBar, ProgressStyle};

/// Terminal view of one run: a percentage bar with tool output printed
/// above it, or one JSON object per event.
pub struct RunView {
    bar: Option<ProgressBar>,
}

impl RunView {
    pub fn bar(cases: usize) -> Self {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {msg:12} [{bar:40.cyan/blue}] {pos:>3}% ({elapsed})",
        )
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(format!("{cases} case(s)"));
        Self { bar: Some(pb) }
    }

    pub fn json() -> Self {
        Self { bar: None }
    }

    /// Returns the terminal status once `RunFinished` arrives.
    pub fn on_event(&self, event: &StageEvent) -> Option<RunStatus> {
        let Some(pb) = &self.bar else {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
            return match event {
                StageEvent::RunFinished { status, .. } => Some(*status),
                _ => None,
            };
        };

        match event {
            StageEvent::LogLine { text } => pb.println(text),
            StageEvent::Progress { percent } => pb.set_position(u64::from(*percent)),
            StageEvent::SegmentationStarted => pb.set_message("segmenting"),
            StageEvent::SegmentationFinished => pb.set_message("meshing"),
            StageEvent::RunFinished { status, message } => {
                match status {
                    RunStatus::Success => pb.finish_with_message("done"),
                    _ => pb.abandon_with_message(status.to_string()),
                }
                eprintln!("{message}");
                return Some(*status);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_run_finished_is_terminal() {
        let view = RunView::json();
        assert_eq!(view.on_event(&StageEvent::Progress { percent: 40 }), None);
        assert_eq!(view.on_event(&StageEvent::SegmentationStarted), None);
        let done = StageEvent::RunFinished {
            status: RunStatus::Cancelled,
            message: "cancelled".into(),
        };
        assert_eq!(view.on_event(&done), Some(RunStatus::Cancelled));
    }

    #[test]
    fn test_bar_tracks_progress() {
        let view = RunView::bar(2);
        view.on_event(&StageEvent::Progress { percent: 67 });
        assert_eq!(view.bar.as_ref().unwrap().position(), 67);
        view.on_event(&StageEvent::SegmentationStarted);
        assert_eq!(view.bar.as_ref().unwrap().message(), "segmenting");
    }
}
