use crate::core::jobs::{JobStatus, can_transition};

#[test]
fn happy_path_transitions_are_allowed() {
    let path = [
        (JobStatus::Unassigned, JobStatus::Scheduled),
        (JobStatus::Accepted, JobStatus::Success),
    ];
    for (from, to) in path {
        assert!(
            can_transition(from, to),
            "expected transition {:?} -> {:?} to be allowed",
            from,
            to
        );
    }
}

#[test]
fn accepted_jobs_can_be_requeued_or_failed() {
    assert!(can_transition(JobStatus::Accepted, JobStatus::Scheduled));
    assert!(can_transition(JobStatus::Accepted, JobStatus::Failure));
    assert!(can_transition(JobStatus::Accepted, JobStatus::Accepted));
}

#[test]
fn finalized_jobs_do_not_move() {
    for from in [JobStatus::Success, JobStatus::Failure] {
        for to in [
            JobStatus::Unassigned,
            JobStatus::Scheduled,
            JobStatus::Accepted,
            JobStatus::Success,
            JobStatus::Failure,
        ] {
            assert!(
                !can_transition(from, to),
                "finalized {:?} must not move to {:?}",
                from,
                to
            );
        }
    }
}

#[test]
fn cannot_finish_without_a_claim() {
    assert!(!can_transition(JobStatus::Scheduled, JobStatus::Success));
    assert!(!can_transition(JobStatus::Unassigned, JobStatus::Accepted));
}

#[test]
fn reports_cannot_claim() {
    assert!(!can_transition(JobStatus::Scheduled, JobStatus::Accepted));
}

#[test]
fn status_strings_round_trip() {
    for status in [
        JobStatus::Unassigned,
        JobStatus::Scheduled,
        JobStatus::Accepted,
        JobStatus::Success,
        JobStatus::Failure,
    ] {
        assert_eq!(JobStatus::from_status(status.as_str()), Some(status));
    }
    assert_eq!(JobStatus::from_status("accepted"), None);
}
