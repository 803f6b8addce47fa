
use chrono::NaiveDate;
use clinic_common::services::AppointmentStore;
use clinic_common::{CalendarError, ClinicError, HttpStatusCode, RejectionReason};
use clinic_config::ScheduleConfig;
use fixtures::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn june(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, day).unwrap()
}

// --- availability ---

#[tokio::test]
async fn test_availability_without_remote_sync() {
    let (coordinator, _) = local_engine();
    let day = coordinator
        .availability_at(CENTRO, june(3), 30, early())
        .await
        .unwrap();

    assert!(!day.closed);
    assert!(!day.calendar_sync);
    assert_eq!(day.slots.len(), 20);
    assert_eq!(day.slots[0].label, "10:00 - 10:30");
    assert_eq!(day.timezone.name(), "America/Mexico_City");
}

#[tokio::test]
async fn test_availability_subtracts_remote_busy() {
    let e = engine();
    e.calendar.add_busy(cdmx(3, 14, 0), cdmx(3, 15, 0));

    let day = e
        .coordinator
        .availability_at(CENTRO, june(3), 30, early())
        .await
        .unwrap();

    assert!(day.calendar_sync);
    assert_eq!(day.slots.len(), 18);
    assert!(day.slots.iter().all(|s| s.label != "14:00 - 14:30"));
    assert_eq!(e.calendar.fetches(), 1);
}

#[tokio::test]
async fn test_closed_day_skips_remote() {
    let e = engine();
    let day = e
        .coordinator
        .availability_at(CENTRO, june(2), 30, early())
        .await
        .unwrap();

    assert!(day.closed);
    assert!(day.slots.is_empty());
    assert!(!day.calendar_sync);
    assert_eq!(e.calendar.fetches(), 0);
}

#[tokio::test]
async fn test_cancun_branch_uses_its_zone() {
    let e = engine();
    let day = e
        .coordinator
        .availability_at(CANCUN, june(3), 60, early())
        .await
        .unwrap();

    assert_eq!(day.timezone.name(), "America/Cancun");
    assert_eq!(day.slots[0].start.naive_local().to_string(), "2030-06-03 10:00:00");
    assert_eq!(day.slots.len(), 19);
    let last = day.slots.last().unwrap();
    assert_eq!(last.start.naive_local().to_string(), "2030-06-03 19:00:00");
    assert_eq!(last.label, "19:00 - 20:00");
}

#[tokio::test]
async fn test_availability_input_errors() {
    let e = engine();
    for (branch, duration) in [(99, 30), (CLOSED_BRANCH, 30), (CENTRO, 0), (CENTRO, 241)] {
        let err = e
            .coordinator
            .availability_at(branch, june(3), duration, early())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ClinicError::ValidationError(_)),
            "branch {} duration {}: {:?}",
            branch,
            duration,
            err
        );
    }
}

#[tokio::test]
async fn test_availability_surfaces_remote_outage() {
    let e = engine();
    e.calendar
        .fail_fetch_with(CalendarError::ServiceUnavailable("timed out".into()));

    let err = e
        .coordinator
        .availability_at(CENTRO, june(3), 30, early())
        .await
        .unwrap_err();
    assert!(matches!(err, ClinicError::RemoteUnavailable(_)));
    assert!(err.is_retryable());
}

// --- booking ---

#[tokio::test]
async fn test_booking_creates_remote_event_then_local_link() {
    let e = engine();
    let outcome = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap();

    let events = e.calendar.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(outcome.remote_event_id.as_deref(), Some(event.id.as_str()));
    assert_eq!(event.calendar_id, "primary");
    assert_eq!(event.draft.summary, "Limpieza dental - Ana López");
    assert_eq!(event.draft.attendee_email.as_deref(), Some("ana.lopez@example.mx"));
    assert_eq!(event.draft.back_reference.appointment_id, outcome.appointment_id);
    assert_eq!(event.draft.back_reference.branch_id, CENTRO);
    assert_eq!(event.draft.back_reference.patient_id, ANA);

    let link = e.store.get(outcome.appointment_id).await.unwrap().unwrap();
    assert!(link.active);
    assert_eq!(link.remote_event_id, outcome.remote_event_id);
}

#[tokio::test]
async fn test_invalid_email_is_not_invited() {
    let e = engine();
    let mut req = request(CANCUN, cancun(3, 10, 0), cancun(3, 10, 30));
    req.patient_id = LUIS;
    e.coordinator.book_at(req, early()).await.unwrap();

    let event = &e.calendar.events()[0];
    assert_eq!(event.calendar_id, "cancun@group.calendar.google.com");
    assert_eq!(event.draft.timezone, "America/Cancun");
    assert_eq!(event.draft.attendee_email, None);
}

#[tokio::test]
async fn test_overlap_is_rejected_without_side_effects() {
    let e = engine();
    e.calendar.add_busy(cdmx(3, 14, 0), cdmx(3, 15, 0));

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 14, 30), cdmx(3, 15, 0)), early())
        .await
        .unwrap_err();

    assert!(err.is_business_rule(RejectionReason::Conflict));
    assert_eq!(err.status_code(), 409);
    assert_eq!(e.calendar.creates(), 0);
    assert!(e.store.inner.is_empty());
}

#[tokio::test]
async fn test_overlap_finer_than_slot_grid() {
    let e = engine();
    e.calendar.add_busy(cdmx(3, 14, 10), cdmx(3, 14, 20));

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 14, 0), cdmx(3, 14, 30)), early())
        .await
        .unwrap_err();
    assert!(err.is_business_rule(RejectionReason::Conflict));

    // touching the busy interval is fine
    e.coordinator
        .book_at(request(CENTRO, cdmx(3, 14, 20), cdmx(3, 14, 50)), early())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_business_rules_are_checked_before_remote() {
    let e = engine();
    let cases = [
        (cdmx(2, 11, 0), cdmx(2, 11, 30), RejectionReason::ClosedDay),
        (cdmx(3, 19, 45), cdmx(3, 20, 15), RejectionReason::OutsideBusinessHours),
        (cdmx(3, 19, 30), cdmx(4, 0, 30), RejectionReason::CrossesMidnight),
        (cdmx(3, 12, 0), cdmx(3, 11, 0), RejectionReason::InvalidWindow),
    ];
    for (start, end, reason) in cases {
        let err = e
            .coordinator
            .book_at(request(CENTRO, start, end), early())
            .await
            .unwrap_err();
        assert!(err.is_business_rule(reason), "expected {}: {:?}", reason, err);
    }

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), cdmx(3, 12, 0))
        .await
        .unwrap_err();
    assert!(err.is_business_rule(RejectionReason::StartsInPast));

    assert_eq!(e.calendar.fetches(), 0);
    assert_eq!(e.calendar.creates(), 0);
}

#[tokio::test]
async fn test_unknown_patient_is_a_validation_error() {
    let e = engine();
    let mut req = request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30));
    req.patient_id = 404;
    let err = e.coordinator.book_at(req, early()).await.unwrap_err();
    assert!(matches!(err, ClinicError::ValidationError(_)));
}

#[tokio::test]
async fn test_remote_create_failure_leaves_nothing_locally() {
    let e = engine();
    e.calendar
        .fail_create_with(CalendarError::ServiceUnavailable("503 backend error".into()));

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap_err();
    assert!(matches!(err, ClinicError::RemoteUnavailable(_)));
    assert!(e.store.inner.is_empty());
}

#[tokio::test]
async fn test_revoked_credential_needs_reauthorization() {
    let e = engine();
    e.calendar
        .fail_fetch_with(CalendarError::CredentialRejected("invalid_grant".into()));

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap_err();
    assert!(matches!(err, ClinicError::CredentialRejected(_)));
    assert_eq!(err.operator_action(), "reauthorize_branch");
}

#[tokio::test]
async fn test_missing_credential_or_calendar_is_configuration() {
    let e = engine();
    e.connector.missing_credential.store(true, Ordering::SeqCst);
    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "credential_missing");

    let mut gcal = gcal_config();
    gcal.default_calendar_id = None;
    let e = engine_with(ScheduleConfig::default(), gcal);
    let err = e
        .coordinator
        .availability_at(CENTRO, june(3), 30, early())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "calendar_missing");
    assert_eq!(err.operator_action(), "fix_configuration");
    // Cancún has its own calendar
    assert!(e
        .coordinator
        .availability_at(CANCUN, june(3), 30, early())
        .await
        .is_ok());
}

// --- partial failures ---

#[tokio::test]
async fn test_link_failure_is_compensated() {
    let e = engine();
    e.store.fail_link.store(true, Ordering::SeqCst);

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap_err();

    match err {
        ClinicError::PartiallyFailed {
            remote_event_id,
            compensated,
            ..
        } => {
            assert_eq!(remote_event_id, "evt_1");
            assert!(compensated);
        }
        other => panic!("expected PartiallyFailed, got {:?}", other),
    }
    assert!(e.calendar.events().is_empty());
    assert!(e.store.inner.is_empty());
}

#[tokio::test]
async fn test_insert_failure_is_compensated() {
    let e = engine();
    e.store.fail_insert.store(true, Ordering::SeqCst);

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClinicError::PartiallyFailed {
            compensated: true,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(e.calendar.deletes(), 1);
    assert!(e.calendar.events().is_empty());
}

#[tokio::test]
async fn test_failed_compensation_is_reported() {
    let e = engine();
    e.store.fail_link.store(true, Ordering::SeqCst);
    e.calendar
        .fail_delete_with(CalendarError::ServiceUnavailable("timed out".into()));

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClinicError::PartiallyFailed {
            compensated: false,
            ..
        }
    ));
    assert_eq!(err.operator_action(), "reconcile");
    assert_eq!(e.calendar.events().len(), 1);
}

#[tokio::test]
async fn test_compensation_can_be_switched_off() {
    let schedule = ScheduleConfig {
        compensate_partial_failures: false,
        ..ScheduleConfig::default()
    };
    let e = engine_with(schedule, gcal_config());
    e.store.fail_link.store(true, Ordering::SeqCst);

    let err = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClinicError::PartiallyFailed {
            compensated: false,
            ..
        }
    ));
    assert_eq!(e.calendar.deletes(), 0);
    assert_eq!(e.calendar.events().len(), 1);
}

// --- cancel ---

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let e = engine();
    let booked = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap();

    let first = e.coordinator.cancel(booked.appointment_id, CENTRO).await.unwrap();
    assert!(first.deleted);
    assert!(first.remote_event_deleted);
    assert!(e.calendar.events().is_empty());
    assert!(!e.store.get(booked.appointment_id).await.unwrap().unwrap().active);

    let second = e.coordinator.cancel(booked.appointment_id, CENTRO).await.unwrap();
    assert!(second.deleted);
    assert!(!second.remote_event_deleted);
    assert_eq!(e.calendar.deletes(), 1);
}

#[tokio::test]
async fn test_cancel_tolerates_event_deleted_remotely() {
    let e = engine();
    let booked = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap();
    e.calendar.events.lock().unwrap().clear();

    let outcome = e.coordinator.cancel(booked.appointment_id, CENTRO).await.unwrap();
    assert!(outcome.remote_event_deleted);
}

#[tokio::test]
async fn test_cancel_keeps_record_when_remote_delete_fails() {
    let e = engine();
    let booked = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap();
    e.calendar
        .fail_delete_with(CalendarError::ServiceUnavailable("timed out".into()));

    let err = e
        .coordinator
        .cancel(booked.appointment_id, CENTRO)
        .await
        .unwrap_err();
    assert!(matches!(err, ClinicError::RemoteUnavailable(_)));
    assert!(e.store.get(booked.appointment_id).await.unwrap().unwrap().active);

    // operator retries once the provider is back
    *e.calendar.fail_delete.lock().unwrap() = None;
    let outcome = e.coordinator.cancel(booked.appointment_id, CENTRO).await.unwrap();
    assert!(outcome.remote_event_deleted);
}

#[tokio::test]
async fn test_cancel_checks_branch_and_existence() {
    let e = engine();
    let booked = e
        .coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap();

    let err = e.coordinator.cancel(booked.appointment_id, CANCUN).await.unwrap_err();
    assert!(matches!(err, ClinicError::NotFoundError(_)));
    let err = e.coordinator.cancel(9999, CENTRO).await.unwrap_err();
    assert!(matches!(err, ClinicError::NotFoundError(_)));
    assert_eq!(e.calendar.deletes(), 0);
}

#[tokio::test]
async fn test_local_only_booking_and_cancel() {
    let (coordinator, store) = local_engine();
    let booked = coordinator
        .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
        .await
        .unwrap();
    assert_eq!(booked.remote_event_id, None);
    assert_eq!(store.inner.active_appointments().len(), 1);

    let outcome = coordinator.cancel(booked.appointment_id, CENTRO).await.unwrap();
    assert!(outcome.deleted);
    assert!(!outcome.remote_event_deleted);
    assert!(store.inner.active_appointments().is_empty());
}

// --- concurrency ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_for_one_window_succeed_once() {
    let e = engine();
    e.calendar.delay_creates(StdDuration::from_millis(50));
    let coordinator = Arc::new(e.coordinator);

    let attempts: Vec<_> = (0..5)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
                    .await
            })
        })
        .collect();

    let mut booked = 0;
    let mut conflicts = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => booked += 1,
            Err(err) if err.is_business_rule(RejectionReason::Conflict) => conflicts += 1,
            Err(err) => panic!("unexpected error: {:?}", err),
        }
    }

    assert_eq!(booked, 1);
    assert_eq!(conflicts, 4);
    assert_eq!(e.calendar.events().len(), 1);
    assert_eq!(e.store.inner.active_appointments().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_branches_do_not_block_each_other() {
    let e = engine();
    let coordinator = Arc::new(e.coordinator);

    let centro = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .book_at(request(CENTRO, cdmx(3, 11, 0), cdmx(3, 11, 30)), early())
                .await
        })
    };
    let cancun_booking = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .book_at(request(CANCUN, cancun(3, 11, 0), cancun(3, 11, 30)), early())
                .await
        })
    };

    assert!(centro.await.unwrap().is_ok());
    assert!(cancun_booking.await.unwrap().is_ok());
    assert_eq!(e.calendar.events().len(), 2);
}
