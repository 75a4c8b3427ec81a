//! Scheduler Integration Tests
//!
//! Tests for:
//! - Stage and task ordering through before/after constraints
//! - Cycle and duplicate rejection leaving the schedule unchanged
//! - Task start/stop, including from inside running callbacks
//! - Stage callbacks, deltas, removal

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::XorShift;
use threlte::errors::ThrelteError;
use threlte::invalidation::Invalidator;
use threlte::scheduler::{FrameContext, Key, Scheduler, StageOptions, Task, TaskOptions};

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn record(log: &Log, name: &str) -> impl FnMut(&mut FrameContext<'_>) + 'static {
    let log = Rc::clone(log);
    let name = name.to_string();
    move |_: &mut FrameContext<'_>| log.borrow_mut().push(name.clone())
}

fn keys(names: &[&str]) -> Vec<Key> {
    names.iter().map(|name| Key::named(name.to_string())).collect()
}

/// Adds a stage holding a single task that records the stage's name.
fn add_recorded_stage(scheduler: &mut Scheduler, log: &Log, name: &str, options: StageOptions) {
    let stage = scheduler.create_stage(name.to_string(), options).unwrap();
    scheduler
        .create_task(&stage, "record", record(log, name), TaskOptions::new())
        .unwrap();
}

// ============================================================================
// Stage Ordering
// ============================================================================

#[test]
fn stages_run_in_constraint_order() {
    common::init_logging();
    let mut scheduler = Scheduler::default();
    let log = new_log();

    add_recorded_stage(&mut scheduler, &log, "render", StageOptions::new());
    add_recorded_stage(&mut scheduler, &log, "physics", StageOptions::new().before("render"));
    add_recorded_stage(&mut scheduler, &log, "input", StageOptions::new().before("physics"));
    add_recorded_stage(&mut scheduler, &log, "post", StageOptions::new().after("render"));

    scheduler.run(0.0);
    assert_eq!(*log.borrow(), vec!["input", "physics", "render", "post"]);
    assert_eq!(scheduler.stage_order(), keys(&["input", "physics", "render", "post"]));
}

#[test]
fn unconstrained_stages_keep_insertion_order() {
    let mut scheduler = Scheduler::default();
    for name in ["a", "b", "c"] {
        scheduler.create_stage(name, StageOptions::new()).unwrap();
    }
    assert_eq!(scheduler.stage_order(), keys(&["a", "b", "c"]));
}

#[test]
fn stage_constraint_may_reference_a_later_stage() {
    let mut scheduler = Scheduler::default();
    scheduler.create_stage("late", StageOptions::new().after("early")).unwrap();
    scheduler.create_stage("other", StageOptions::new()).unwrap();
    scheduler.create_stage("early", StageOptions::new()).unwrap();
    assert_eq!(scheduler.stage_order(), keys(&["early", "late", "other"]));
}

#[test]
fn cyclic_stage_constraint_is_rejected() {
    let mut scheduler = Scheduler::default();
    let log = new_log();
    add_recorded_stage(&mut scheduler, &log, "a", StageOptions::new().before("b"));
    add_recorded_stage(&mut scheduler, &log, "c", StageOptions::new());
    let before = scheduler.stage_order();

    let err = scheduler
        .create_stage("b", StageOptions::new().before("a"))
        .unwrap_err();
    assert!(matches!(err, ThrelteError::CyclicOrdering { kind: "stage", .. }));
    assert_eq!(scheduler.stage_order(), before);
    assert!(!scheduler.has_stage(&Key::named("b")));

    scheduler.run(0.0);
    assert_eq!(*log.borrow(), vec!["a", "c"]);
}

#[test]
fn transitive_cycle_is_rejected() {
    let mut scheduler = Scheduler::default();
    scheduler.create_stage("a", StageOptions::new()).unwrap();
    scheduler.create_stage("b", StageOptions::new().after("a")).unwrap();
    let before = scheduler.stage_order();

    let err = scheduler
        .create_stage("c", StageOptions::new().after("b").before("a"))
        .unwrap_err();
    assert!(matches!(err, ThrelteError::CyclicOrdering { .. }));
    assert!(err.to_string().contains("\"c\""));
    assert_eq!(scheduler.stage_order(), before);
}

#[test]
fn self_referencing_stage_is_rejected() {
    let mut scheduler = Scheduler::default();
    let err = scheduler
        .create_stage("loop", StageOptions::new().before("loop"))
        .unwrap_err();
    assert!(matches!(err, ThrelteError::CyclicOrdering { .. }));
    assert!(scheduler.stage_order().is_empty());
}

#[test]
fn duplicate_stage_key_is_rejected() {
    let mut scheduler = Scheduler::default();
    scheduler.create_stage("main", StageOptions::new()).unwrap();
    let err = scheduler.create_stage("main", StageOptions::new()).unwrap_err();
    assert!(matches!(err, ThrelteError::DuplicateKey { kind: "stage", .. }));
    assert_eq!(scheduler.stage_order().len(), 1);
}

#[test]
fn symbol_keys_with_equal_descriptions_are_distinct() {
    let mut scheduler = Scheduler::default();
    scheduler.create_stage(Key::symbol("stage"), StageOptions::new()).unwrap();
    scheduler.create_stage(Key::symbol("stage"), StageOptions::new()).unwrap();
    assert_eq!(scheduler.stage_order().len(), 2);
}

#[test]
fn random_acyclic_constraints_are_satisfied() {
    const STAGES: usize = 10;

    for seed in 1..=25 {
        let mut rng = XorShift::new(seed);

        // A hidden total order; every constraint agrees with it.
        let mut hidden: Vec<usize> = (0..STAGES).collect();
        rng.shuffle(&mut hidden);
        let mut edges = Vec::new();
        for i in 0..STAGES {
            for j in (i + 1)..STAGES {
                if rng.chance(30) {
                    edges.push((hidden[i], hidden[j]));
                }
            }
        }

        let mut insertion: Vec<usize> = (0..STAGES).collect();
        rng.shuffle(&mut insertion);

        let mut scheduler = Scheduler::default();
        let log = new_log();
        for &stage in &insertion {
            let mut options = StageOptions::new();
            // Every edge is declared by its target; some also by their source.
            for &(from, to) in &edges {
                if to == stage {
                    options = options.after(format!("s{from}"));
                } else if from == stage && rng.chance(50) {
                    options = options.before(format!("s{to}"));
                }
            }
            add_recorded_stage(&mut scheduler, &log, &format!("s{stage}"), options);
        }

        scheduler.run(0.0);
        let order = log.borrow();
        let position = |stage: usize| {
            let name = format!("s{stage}");
            order.iter().position(|entry| *entry == name).unwrap()
        };
        assert_eq!(order.len(), STAGES);
        for &(from, to) in &edges {
            assert!(
                position(from) < position(to),
                "seed {seed}: s{from} must run before s{to}, got {order:?}"
            );
        }
    }
}

#[test]
fn chain_resolves_identically_for_any_insertion_order() {
    const STAGES: usize = 7;
    let expected: Vec<Key> = (0..STAGES).map(|i| Key::named(format!("s{i}"))).collect();

    for seed in 1..=20 {
        let mut rng = XorShift::new(seed * 7919);
        let mut insertion: Vec<usize> = (0..STAGES).collect();
        rng.shuffle(&mut insertion);

        let mut scheduler = Scheduler::default();
        for &i in &insertion {
            let mut options = StageOptions::new();
            if i + 1 < STAGES {
                options = options.before(format!("s{}", i + 1));
            }
            scheduler.create_stage(format!("s{i}"), options).unwrap();
        }
        assert_eq!(scheduler.stage_order(), expected, "insertion order {insertion:?}");
    }
}

// ============================================================================
// Task Ordering
// ============================================================================

#[test]
fn tasks_run_in_constraint_order_within_stage() {
    let mut scheduler = Scheduler::default();
    let log = new_log();
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();

    scheduler.create_task(&stage, "draw", record(&log, "draw"), TaskOptions::new()).unwrap();
    scheduler
        .create_task(&stage, "update", record(&log, "update"), TaskOptions::new().before("draw"))
        .unwrap();
    scheduler
        .create_task(&stage, "late", record(&log, "late"), TaskOptions::new().after("draw"))
        .unwrap();
    scheduler
        .create_task(&stage, "input", record(&log, "input"), TaskOptions::new().before("update"))
        .unwrap();

    scheduler.run(0.0);
    assert_eq!(*log.borrow(), vec!["input", "update", "draw", "late"]);
    assert_eq!(
        scheduler.task_order(stage.key()),
        keys(&["input", "update", "draw", "late"])
    );
}

#[test]
fn task_keys_are_scoped_to_their_stage() {
    let mut scheduler = Scheduler::default();
    let a = scheduler.create_stage("a", StageOptions::new()).unwrap();
    let b = scheduler.create_stage("b", StageOptions::new()).unwrap();

    scheduler.create_task(&a, "task", |_| {}, TaskOptions::new()).unwrap();
    scheduler.create_task(&b, "task", |_| {}, TaskOptions::new()).unwrap();
    let err = scheduler.create_task(&a, "task", |_| {}, TaskOptions::new()).unwrap_err();
    assert!(matches!(err, ThrelteError::DuplicateKey { kind: "task", .. }));
}

#[test]
fn cyclic_task_constraint_is_rejected() {
    let mut scheduler = Scheduler::default();
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    scheduler
        .create_task(&stage, "a", |_| {}, TaskOptions::new().before("b"))
        .unwrap();

    let err = scheduler
        .create_task(&stage, "b", |_| {}, TaskOptions::new().before("a"))
        .unwrap_err();
    assert!(matches!(err, ThrelteError::CyclicOrdering { kind: "task", .. }));
    assert_eq!(scheduler.task_order(stage.key()), keys(&["a"]));
}

#[test]
fn task_in_unknown_stage_is_rejected() {
    let mut scheduler = Scheduler::default();
    let err = scheduler
        .create_task("missing", "task", |_| {}, TaskOptions::new())
        .unwrap_err();
    assert!(matches!(err, ThrelteError::UnknownStage(ref key) if *key == Key::named("missing")));
}

#[test]
fn removing_a_task_keeps_sibling_order() {
    let mut scheduler = Scheduler::default();
    let log = new_log();
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    scheduler.create_task(&stage, "a", record(&log, "a"), TaskOptions::new()).unwrap();
    let b = scheduler.create_task(&stage, "b", record(&log, "b"), TaskOptions::new()).unwrap();
    scheduler.create_task(&stage, "c", record(&log, "c"), TaskOptions::new()).unwrap();

    assert!(scheduler.remove_task(&b));
    assert!(!scheduler.remove_task(&b));
    scheduler
        .create_task(&stage, "d", record(&log, "d"), TaskOptions::new().before("c"))
        .unwrap();

    scheduler.run(0.0);
    assert_eq!(*log.borrow(), vec!["a", "d", "c"]);
}

// ============================================================================
// Start / Stop
// ============================================================================

#[test]
fn start_and_stop_are_idempotent() {
    let mut scheduler = Scheduler::default();
    let calls = Rc::new(Cell::new(0));
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    let counter = Rc::clone(&calls);
    let task = scheduler
        .create_task(
            &stage,
            "count",
            move |_| counter.set(counter.get() + 1),
            TaskOptions::new().auto_start(false),
        )
        .unwrap();

    scheduler.run(0.0);
    assert_eq!(calls.get(), 0);

    task.start();
    task.start();
    scheduler.run(1.0);
    assert_eq!(calls.get(), 1);

    task.stop();
    task.stop();
    scheduler.run(2.0);
    assert_eq!(calls.get(), 1);
    assert!(!task.is_started());
}

#[test]
fn task_can_stop_itself_while_running() {
    let mut scheduler = Scheduler::default();
    let calls = Rc::new(Cell::new(0));
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    let counter = Rc::clone(&calls);
    let task = scheduler
        .create_task(
            &stage,
            "once",
            move |frame| {
                counter.set(counter.get() + 1);
                frame.stop();
            },
            TaskOptions::new(),
        )
        .unwrap();

    for frame in 0..3 {
        scheduler.run(f64::from(frame));
    }
    assert_eq!(calls.get(), 1);
    assert!(!task.is_started());
    assert!(task.is_attached());
}

#[test]
fn task_stopped_by_an_earlier_task_is_skipped_in_the_same_frame() {
    let mut scheduler = Scheduler::default();
    let log = new_log();
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    let victim: Rc<RefCell<Option<Task>>> = Rc::new(RefCell::new(None));

    let target = Rc::clone(&victim);
    scheduler
        .create_task(
            &stage,
            "stopper",
            move |_| {
                if let Some(task) = target.borrow().as_ref() {
                    task.stop();
                }
            },
            TaskOptions::new(),
        )
        .unwrap();
    let task = scheduler
        .create_task(&stage, "victim", record(&log, "victim"), TaskOptions::new())
        .unwrap();
    *victim.borrow_mut() = Some(task.clone());

    scheduler.run(0.0);
    assert!(log.borrow().is_empty());
    assert!(!task.is_started());
}

#[test]
fn removed_task_cannot_be_restarted() {
    let mut scheduler = Scheduler::default();
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    let task = scheduler.create_task(&stage, "t", |_| {}, TaskOptions::new()).unwrap();

    assert!(scheduler.remove_task(&task));
    assert!(!task.is_attached());
    assert!(!task.is_started());
    task.start();
    assert!(!task.is_started());
}

#[test]
fn removing_a_stage_detaches_its_tasks() {
    let mut scheduler = Scheduler::default();
    let log = new_log();
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    let task = scheduler.create_task(&stage, "t", record(&log, "t"), TaskOptions::new()).unwrap();

    assert!(scheduler.remove_stage(stage.key()));
    assert!(!scheduler.remove_stage(stage.key()));
    assert!(!task.is_attached());

    scheduler.run(0.0);
    assert!(log.borrow().is_empty());
}

#[test]
fn auto_invalidating_tasks_are_counted_while_started() {
    let invalidator = Invalidator::default();
    let mut scheduler = Scheduler::new(invalidator.clone());
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();

    let task = scheduler
        .create_task(&stage, "spin", |_| {}, TaskOptions::new().auto_invalidate(true))
        .unwrap();
    scheduler.create_task(&stage, "plain", |_| {}, TaskOptions::new()).unwrap();
    assert_eq!(invalidator.auto_invalidations(), 1);
    assert!(invalidator.should_render());

    task.stop();
    assert_eq!(invalidator.auto_invalidations(), 0);
    task.start();
    assert!(scheduler.remove_task(&task));
    assert_eq!(invalidator.auto_invalidations(), 0);
    assert!(!invalidator.should_render());
}

// ============================================================================
// Execution
// ============================================================================

#[test]
fn tasks_receive_timestamp_and_delta() {
    let mut scheduler = Scheduler::default();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    let sink = Rc::clone(&seen);
    scheduler
        .create_task(
            &stage,
            "t",
            move |frame| sink.borrow_mut().push((frame.timestamp(), frame.delta())),
            TaskOptions::new(),
        )
        .unwrap();

    scheduler.run(100.0);
    scheduler.run(116.0);
    scheduler.run(150.0);
    scheduler.run(140.0);
    assert_eq!(
        *seen.borrow(),
        vec![(100.0, 0.0), (116.0, 16.0), (150.0, 34.0), (140.0, 0.0)]
    );
    assert_eq!(scheduler.frame_count(), 4);
}

#[test]
fn stage_callback_controls_task_execution() {
    let mut scheduler = Scheduler::default();
    let deltas = Rc::new(RefCell::new(Vec::new()));
    let mut frame = 0;
    let stage = scheduler
        .create_stage(
            "fixed",
            StageOptions::new().callback(move |_, run_tasks| {
                if frame % 2 == 0 {
                    run_tasks(Some(1.0));
                }
                frame += 1;
            }),
        )
        .unwrap();
    let sink = Rc::clone(&deltas);
    scheduler
        .create_task(&stage, "t", move |f| sink.borrow_mut().push(f.delta()), TaskOptions::new())
        .unwrap();

    for timestamp in [0.0, 10.0, 20.0] {
        scheduler.run(timestamp);
    }
    assert_eq!(*deltas.borrow(), vec![1.0, 1.0]);
}

#[test]
fn stage_callback_may_run_tasks_repeatedly() {
    let mut scheduler = Scheduler::default();
    let calls = Rc::new(Cell::new(0));
    let stage = scheduler
        .create_stage(
            "substeps",
            StageOptions::new().callback(|delta, run_tasks| {
                for _ in 0..3 {
                    run_tasks(Some(delta / 3.0));
                }
            }),
        )
        .unwrap();
    let counter = Rc::clone(&calls);
    scheduler
        .create_task(&stage, "t", move |_| counter.set(counter.get() + 1), TaskOptions::new())
        .unwrap();

    scheduler.run(0.0);
    assert_eq!(calls.get(), 3);
}

#[test]
fn stage_of_task_finds_owning_stage() {
    let mut scheduler = Scheduler::default();
    scheduler.create_stage("a", StageOptions::new()).unwrap();
    let b = scheduler.create_stage("b", StageOptions::new()).unwrap();
    scheduler.create_task(&b, "physics", |_| {}, TaskOptions::new()).unwrap();

    assert_eq!(scheduler.stage_of_task(&Key::named("physics")), Some(b));
    assert!(scheduler.stage_of_task(&Key::named("missing")).is_none());
}

#[test]
fn clear_detaches_everything() {
    let mut scheduler = Scheduler::default();
    let stage = scheduler.create_stage("main", StageOptions::new()).unwrap();
    let task = scheduler.create_task(&stage, "t", |_| {}, TaskOptions::new()).unwrap();

    scheduler.clear();
    assert!(scheduler.stage_order().is_empty());
    assert!(!task.is_attached());
}
