//! Orchestrator behaviour with in-process stand-in stages.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Sender;
use dcmesh_core::{
    Case, Device, ExecutionContext, Orchestrator, PipelineError, PipelineRequest, PipelineRunner,
    RunHandle, RunState, RunStatus, Stage, StageEvent, StageOutcome,
};

type Calls = Arc<Mutex<Vec<(&'static str, usize)>>>;

enum Behavior {
    Complete,
    FailOn(usize),
    /// Reports on the channel, then blocks until the run is cancelled.
    BlockOn(usize, Sender<usize>),
}

struct FakeStage {
    id: &'static str,
    mark: f64,
    calls: Calls,
    behavior: Behavior,
}

impl FakeStage {
    fn boxed(id: &'static str, mark: f64, calls: &Calls, behavior: Behavior) -> Box<dyn Stage> {
        Box::new(Self {
            id,
            mark,
            calls: Arc::clone(calls),
            behavior,
        })
    }
}

impl Stage for FakeStage {
    fn id(&self) -> &'static str {
        self.id
    }

    fn progress_mark(&self) -> f64 {
        self.mark
    }

    fn run(&self, case: &Case, ctx: &ExecutionContext) -> dcmesh_core::Result<StageOutcome> {
        self.calls.lock().unwrap().push((self.id, case.index));
        assert!(case.volume_dir().is_dir());
        assert!(case.segmentation_dir().is_dir());
        assert!(case.output_dir.is_dir());

        match &self.behavior {
            Behavior::Complete => {
                fs::write(case.output_dir.join(format!("{}.txt", self.id)), b"ok")?;
                Ok(StageOutcome::Completed)
            }
            Behavior::FailOn(index) if *index == case.index => Err(PipelineError::NotFound {
                path: case.segmentation_file(),
            }),
            Behavior::BlockOn(index, started) if *index == case.index => {
                started.send(case.index).unwrap();
                let _ = ctx.cancel_token().signal().recv();
                Ok(StageOutcome::Cancelled)
            }
            _ => Ok(StageOutcome::Completed),
        }
    }
}

struct Fixture {
    _root: tempfile::TempDir,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    scratch: PathBuf,
}

fn fixture(cases: usize) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let inputs: Vec<PathBuf> = (1..=cases)
        .map(|i| {
            let dir = root.path().join(format!("patient_{i}"));
            fs::create_dir_all(&dir).unwrap();
            dir
        })
        .collect();
    let output = root.path().join("out");
    let scratch = root.path().join("scratch");
    fs::create_dir_all(&output).unwrap();
    Fixture {
        inputs,
        output,
        scratch,
        _root: root,
    }
}

fn orchestrator(stages: Vec<Box<dyn Stage>>, scratch: &Path) -> Orchestrator {
    Orchestrator::new(PipelineRunner::new(stages).with_scratch_root(scratch))
}

fn drain(handle: &mut RunHandle) -> Vec<StageEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.events().blocking_recv() {
        let done = matches!(event, StageEvent::RunFinished { .. });
        events.push(event);
        if done {
            break;
        }
    }
    events
}

fn progress_values(events: &[StageEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            StageEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}

fn scratch_is_empty(scratch: &Path) -> bool {
    !scratch.exists() || fs::read_dir(scratch).unwrap().count() == 0
}

fn standard_fakes(calls: &Calls) -> Vec<Box<dyn Stage>> {
    vec![
        FakeStage::boxed("convert.fake", 1.0 / 3.0, calls, Behavior::Complete),
        FakeStage::boxed("rename.fake", 1.33 / 3.0, calls, Behavior::Complete),
        FakeStage::boxed("segment.fake", 2.0 / 3.0, calls, Behavior::Complete),
        FakeStage::boxed("mesh.fake", 1.0, calls, Behavior::Complete),
    ]
}

#[test]
fn test_successful_run_visits_every_stage_in_order() {
    let fx = fixture(2);
    let calls: Calls = Arc::default();
    let orch = orchestrator(standard_fakes(&calls), &fx.scratch);
    assert_eq!(orch.pipeline_id(), "convert→rename→segment→mesh");

    let mut handle = orch
        .start_run(PipelineRequest::new(fx.inputs.clone(), &fx.output, Device::Cpu))
        .unwrap();
    let events = drain(&mut handle);
    let summary = handle.wait();

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.cases.len(), 2);
    assert_eq!(summary.cases[0].stages.len(), 4);
    assert_eq!(orch.state(), RunState::Idle);
    assert_eq!(orch.last_status(), Some(RunStatus::Success));

    let calls = calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("convert.fake", 0),
            ("rename.fake", 0),
            ("segment.fake", 0),
            ("mesh.fake", 0),
            ("convert.fake", 1),
            ("rename.fake", 1),
            ("segment.fake", 1),
            ("mesh.fake", 1),
        ]
    );

    let progress = progress_values(&events);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&100));
    assert!(matches!(
        events.last(),
        Some(StageEvent::RunFinished { status: RunStatus::Success, .. })
    ));

    assert!(fx.output.join("patient_1_stl/mesh.fake.txt").exists());
    assert!(fx.output.join("patient_2_stl/mesh.fake.txt").exists());
    assert!(scratch_is_empty(&fx.scratch));
}

#[test]
fn test_state_returns_to_idle_after_run_finished() {
    let fx = fixture(1);
    let calls: Calls = Arc::default();
    let orch = orchestrator(standard_fakes(&calls), &fx.scratch);
    assert_eq!(orch.state(), RunState::Idle);
    assert_eq!(orch.last_status(), None);

    let mut handle = orch
        .start_run(PipelineRequest::new(fx.inputs.clone(), &fx.output, Device::Cpu))
        .unwrap();
    let started_at = handle.started_at();
    let run_id = handle.run_id();
    drain(&mut handle);
    let summary = handle.wait();

    assert_eq!(summary.run_id, run_id);
    assert_eq!(summary.started_at, started_at);
    assert!(summary.finished_at >= summary.started_at);
    assert_eq!(orch.state(), RunState::Idle);
    assert_eq!(orch.last_status(), Some(RunStatus::Success));
    assert!(!orch.cancel());
}

#[test]
fn test_fatal_error_aborts_remaining_cases() {
    let fx = fixture(3);
    let calls: Calls = Arc::default();
    let stages = vec![
        FakeStage::boxed("convert.fake", 1.0 / 3.0, &calls, Behavior::Complete),
        FakeStage::boxed("mesh.fake", 1.0, &calls, Behavior::FailOn(1)),
    ];
    let orch = orchestrator(stages, &fx.scratch);

    let mut handle = orch
        .start_run(PipelineRequest::new(fx.inputs.clone(), &fx.output, Device::Cpu))
        .unwrap();
    let events = drain(&mut handle);
    let summary = handle.wait();

    assert_eq!(summary.status, RunStatus::Error);
    assert!(summary.message.contains("NOTFOUND"), "{}", summary.message);
    assert_eq!(orch.state(), RunState::Idle);
    assert_eq!(orch.last_status(), Some(RunStatus::Error));

    let calls = calls.lock().unwrap().clone();
    assert!(!calls.iter().any(|(_, index)| *index == 2), "{calls:?}");

    let finished: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StageEvent::RunFinished { .. }))
        .collect();
    assert_eq!(finished.len(), 1);
    assert!(matches!(
        finished[0],
        StageEvent::RunFinished { status: RunStatus::Error, .. }
    ));

    // earlier output survives, the failing case's scratch does not
    assert!(fx.output.join("patient_1_stl/convert.fake.txt").exists());
    assert!(!fx.output.join("patient_3_stl").exists());
    assert!(scratch_is_empty(&fx.scratch));
}

#[test]
fn test_cancel_during_second_case_stops_the_batch() {
    let fx = fixture(3);
    let calls: Calls = Arc::default();
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let stages = vec![
        FakeStage::boxed("convert.fake", 1.0 / 3.0, &calls, Behavior::Complete),
        FakeStage::boxed("segment.fake", 2.0 / 3.0, &calls, Behavior::BlockOn(1, started_tx)),
        FakeStage::boxed("mesh.fake", 1.0, &calls, Behavior::Complete),
    ];
    let orch = orchestrator(stages, &fx.scratch);

    let mut handle = orch
        .start_run(PipelineRequest::new(fx.inputs.clone(), &fx.output, Device::Cpu))
        .unwrap();

    let blocked_case = started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(blocked_case, 1);
    assert_eq!(orch.state(), RunState::Running);
    assert!(orch.cancel());

    let events = drain(&mut handle);
    let summary = handle.wait();

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(orch.state(), RunState::Idle);
    assert_eq!(orch.last_status(), Some(RunStatus::Cancelled));
    assert!(matches!(
        events.last(),
        Some(StageEvent::RunFinished { status: RunStatus::Cancelled, .. })
    ));

    let calls = calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("convert.fake", 0),
            ("segment.fake", 0),
            ("mesh.fake", 0),
            ("convert.fake", 1),
            ("segment.fake", 1),
        ]
    );

    assert!(fx.output.join("patient_1_stl/mesh.fake.txt").exists());
    assert!(!fx.output.join("patient_3_stl").exists());
    assert!(scratch_is_empty(&fx.scratch));

    let progress = progress_values(&events);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.last().copied().unwrap_or(0) < 100);
}

#[test]
fn test_second_start_is_rejected_while_running() {
    let fx = fixture(1);
    let calls: Calls = Arc::default();
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let stages = vec![FakeStage::boxed(
        "segment.fake",
        1.0,
        &calls,
        Behavior::BlockOn(0, started_tx),
    )];
    let orch = orchestrator(stages, &fx.scratch);
    let request = PipelineRequest::new(fx.inputs.clone(), &fx.output, Device::Cuda);

    let mut handle = orch.start_run(request.clone()).unwrap();
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert!(matches!(orch.start_run(request.clone()), Err(PipelineError::Busy)));

    orch.cancel();
    drain(&mut handle);
    handle.wait();

    // terminal state accepts a new run
    let calls_before = calls.lock().unwrap().len();
    let mut again = orch.start_run(request).unwrap();
    // the blocking stage is released by cancelling right away
    orch.cancel();
    drain(&mut again);
    let summary = again.wait();
    assert_eq!(summary.status, RunStatus::Cancelled);
    assert!(calls.lock().unwrap().len() >= calls_before);
}

#[test]
fn test_invalid_request_never_starts_a_worker() {
    let fx = fixture(1);
    let calls: Calls = Arc::default();
    let orch = orchestrator(standard_fakes(&calls), &fx.scratch);

    let empty = PipelineRequest::new(vec![], &fx.output, Device::Cpu);
    assert!(matches!(orch.start_run(empty), Err(PipelineError::Request(_))));

    let too_many = PipelineRequest::new(vec![fx.inputs[0].clone(); 6], &fx.output, Device::Cpu);
    assert!(matches!(orch.start_run(too_many), Err(PipelineError::Request(_))));

    assert_eq!(orch.state(), RunState::Idle);
    assert!(!orch.cancel());
    assert!(calls.lock().unwrap().is_empty());
}
