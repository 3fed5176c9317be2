use std::sync::Arc;
use std::time::Duration;

use rep_vision::{
    ExerciseDefinition, FramePipeline, HistoryStore, Joint, LandmarkSet, ManualClock,
    MemoryHistoryStore, Point2D, Stage, StopOutcome, WorkerPool,
};

/// Subject lying on the left side with good torso and bottom-leg form; the
/// right knee is bent to `knee_degrees`.
fn frame(knee_degrees: f64) -> LandmarkSet {
    let hip = Point2D::new(0.6, 0.5);
    let knee = Point2D::new(0.6, 0.7);
    // Thigh points straight up from knee to hip; swing the shin from there.
    let theta = (-90.0f64 + knee_degrees).to_radians();
    let ankle = Point2D::new(knee.x + 0.2 * theta.cos(), knee.y + 0.2 * theta.sin());

    LandmarkSet::from_joints([
        (Joint::LeftShoulder, Point2D::new(0.5, 0.2)),
        (Joint::RightShoulder, Point2D::new(0.6, 0.2)),
        (Joint::LeftHip, Point2D::new(0.5, 0.5)),
        (Joint::RightHip, hip),
        (Joint::LeftKnee, Point2D::new(0.5, 0.7)),
        (Joint::LeftAnkle, Point2D::new(0.3, 0.7)),
        (Joint::RightKnee, knee),
        (Joint::RightAnkle, ankle),
    ])
}

fn pipeline() -> (Arc<ManualClock>, FramePipeline<Arc<ManualClock>>) {
    let clock = Arc::new(ManualClock::new());
    let pipeline = FramePipeline::with_clock(ExerciseDefinition::default(), Arc::clone(&clock));
    (clock, pipeline)
}

#[test]
fn five_cycles_then_stop_and_persist() {
    let (clock, pipeline) = pipeline();
    let store = MemoryHistoryStore::new();

    pipeline.start("alice");
    for _ in 0..5 {
        for angle in [175.0, 150.0, 125.0, 150.0, 175.0] {
            clock.advance(Duration::from_millis(200));
            pipeline.process_frame("alice", Some(&frame(angle)));
        }
    }

    let summary = match pipeline.stop("alice") {
        StopOutcome::Stopped(summary) => summary,
        StopOutcome::NoActiveSession => panic!("alice was running"),
    };
    assert_eq!(summary.repetition_count, 5);
    assert_eq!(summary.elapsed, Duration::from_secs(5));

    let record = store.record_session(&summary).expect("memory store never fails");
    assert_eq!(record.total_reps, 5);
    assert_eq!(record.total_duration, 5.0);

    // Display still shows the final count after stop.
    let after = pipeline.process_frame("alice", Some(&frame(125.0)));
    assert_eq!(after.repetition_count, 5);
    assert!(!after.is_active);
    assert_eq!(after.elapsed_seconds, 0);
}

#[test]
fn restart_begins_from_zero() {
    let (_, pipeline) = pipeline();
    pipeline.start("bob");
    pipeline.process_frame("bob", Some(&frame(175.0)));
    pipeline.process_frame("bob", Some(&frame(125.0)));
    pipeline.stop("bob");

    pipeline.start("bob");
    let report = pipeline.process_frame("bob", None);
    assert_eq!(report.repetition_count, 0);
    assert_eq!(report.stage, Stage::Down);
}

#[test]
fn stop_for_unknown_user_reports_no_session() {
    let (_, pipeline) = pipeline();
    assert_eq!(pipeline.stop("nobody"), StopOutcome::NoActiveSession);
    assert!(pipeline.registry().is_empty());
}

#[test]
fn fast_jump_without_reaching_down_threshold_is_not_counted() {
    let (_, pipeline) = pipeline();
    pipeline.start("quick");
    // Raised, then lowered only into the band, then raised again.
    for angle in [175.0, 125.0, 160.0, 125.0] {
        pipeline.process_frame("quick", Some(&frame(angle)));
    }
    let report = pipeline.process_frame("quick", None);
    assert_eq!(report.repetition_count, 1);
}

#[tokio::test]
async fn worker_pool_counts_users_independently() {
    let (_, pipeline) = pipeline();
    let pool = WorkerPool::new(Arc::new(pipeline), 3);
    pool.pipeline().start("p1");
    pool.pipeline().start("p2");

    let mut frames = Vec::new();
    for (user, cycles) in [("p1", 2), ("p2", 4)] {
        for _ in 0..cycles {
            frames.push((user.to_string(), Some(frame(175.0))));
            frames.push((user.to_string(), Some(frame(125.0))));
        }
    }
    let reports = pool.process_batch(frames).await;
    assert!(reports.iter().all(|r| r.is_ok()));

    let StopOutcome::Stopped(p1) = pool.pipeline().stop("p1") else {
        panic!("p1 was running");
    };
    let StopOutcome::Stopped(p2) = pool.pipeline().stop("p2") else {
        panic!("p2 was running");
    };
    assert_eq!(p1.repetition_count, 2);
    assert_eq!(p2.repetition_count, 4);
    pool.shutdown().await;
}
