#[cfg(test)]
mod tests {
    use crate::service::{build_event, busy_interval_from_event, classify_message, ProviderFailure};
    use chrono::{TimeZone, Utc};
    use clinic_common::services::{EventBackReference, EventDraft};
    use clinic_common::CalendarError;
    use google_calendar3::api::{Event, EventDateTime};
    use serde_json::json;

    fn draft(attendee: Option<&str>) -> EventDraft {
        EventDraft {
            start: Utc.with_ymd_and_hms(2030, 6, 3, 16, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2030, 6, 3, 16, 30, 0).unwrap(),
            timezone: "America/Mexico_City".into(),
            summary: "Consultation - Ana López".into(),
            description: "Patient: Ana López".into(),
            attendee_email: attendee.map(Into::into),
            back_reference: EventBackReference {
                appointment_id: 12,
                branch_id: 1,
                patient_id: 5,
            },
        }
    }

    fn timed_event(status: Option<&str>) -> Event {
        Event {
            status: status.map(Into::into),
            start: Some(EventDateTime {
                date_time: Some(Utc.with_ymd_and_hms(2030, 6, 3, 20, 0, 0).unwrap()),
                ..Default::default()
            }),
            end: Some(EventDateTime {
                date_time: Some(Utc.with_ymd_and_hms(2030, 6, 3, 21, 0, 0).unwrap()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_event_carries_back_reference() {
        let event = build_event(&draft(Some("ana@example.mx")));

        assert_eq!(event.summary.as_deref(), Some("Consultation - Ana López"));
        let start = event.start.unwrap();
        assert_eq!(start.time_zone.as_deref(), Some("America/Mexico_City"));
        assert_eq!(
            start.date_time,
            Some(Utc.with_ymd_and_hms(2030, 6, 3, 16, 0, 0).unwrap())
        );

        let private = event.extended_properties.unwrap().private.unwrap();
        assert_eq!(private["appointment_id"], "12");
        assert_eq!(private["branch_id"], "1");
        assert_eq!(private["patient_id"], "5");

        let attendees = event.attendees.unwrap();
        assert_eq!(attendees.len(), 1);
        assert_eq!(attendees[0].email.as_deref(), Some("ana@example.mx"));
    }

    #[test]
    fn test_build_event_without_attendee() {
        let event = build_event(&draft(None));
        assert!(event.attendees.is_none());
    }

    #[test]
    fn test_busy_interval_from_timed_event() {
        let busy = busy_interval_from_event(&timed_event(Some("confirmed"))).unwrap();
        assert_eq!(busy.start, Utc.with_ymd_and_hms(2030, 6, 3, 20, 0, 0).unwrap());
        assert_eq!(busy.end, Utc.with_ymd_and_hms(2030, 6, 3, 21, 0, 0).unwrap());
    }

    #[test]
    fn test_all_day_cancelled_and_malformed_events_are_skipped() {
        assert!(busy_interval_from_event(&timed_event(Some("cancelled"))).is_none());

        let all_day = Event {
            start: Some(EventDateTime {
                date: chrono::NaiveDate::from_ymd_opt(2030, 6, 3),
                ..Default::default()
            }),
            end: Some(EventDateTime {
                date: chrono::NaiveDate::from_ymd_opt(2030, 6, 4),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(busy_interval_from_event(&all_day).is_none());

        let mut backwards = timed_event(None);
        std::mem::swap(&mut backwards.start, &mut backwards.end);
        assert!(busy_interval_from_event(&backwards).is_none());

        assert!(busy_interval_from_event(&Event::default()).is_none());
    }

    #[test]
    fn test_typed_status_classification() {
        let status = |status: u16, message: &str| ProviderFailure::Status {
            status,
            message: message.into(),
        };

        assert!(matches!(
            status(401, "Invalid Credentials").classify(),
            CalendarError::Unauthorized(_)
        ));
        assert!(matches!(
            status(403, "The caller does not have permission").classify(),
            CalendarError::PermissionDenied(_)
        ));
        assert!(matches!(
            status(403, "Rate Limit Exceeded").classify(),
            CalendarError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            status(404, "Not Found").classify(),
            CalendarError::CalendarNotFound(_)
        ));
        assert!(matches!(
            status(503, "Backend Error").classify(),
            CalendarError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            status(418, "teapot").classify(),
            CalendarError::Unknown(_)
        ));
    }

    #[test]
    fn test_gone_events_are_recognised() {
        let gone = |status| ProviderFailure::Status {
            status,
            message: String::new(),
        };
        assert!(gone(404).is_gone());
        assert!(gone(410).is_gone());
        assert!(!gone(403).is_gone());
        assert!(!ProviderFailure::Transport("reset".into()).is_gone());
    }

    #[test]
    fn test_token_failures() {
        assert!(matches!(
            ProviderFailure::Token("invalid_grant: Token has been expired or revoked.".into())
                .classify(),
            CalendarError::CredentialRejected(_)
        ));
        assert!(matches!(
            ProviderFailure::Token("no access token".into()).classify(),
            CalendarError::Unauthorized(_)
        ));
        assert!(matches!(
            ProviderFailure::Transport("events.list timed out after 25s".into()).classify(),
            CalendarError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_bad_request_body_is_read() {
        let failure = ProviderFailure::from(google_calendar3::Error::BadRequest(json!({
            "error": { "code": 404, "message": "Not Found" }
        })));
        assert_eq!(
            failure,
            ProviderFailure::Status {
                status: 404,
                message: "Not Found".into()
            }
        );
        assert!(failure.is_gone());

        let failure = ProviderFailure::from(google_calendar3::Error::Cancelled);
        assert!(matches!(failure, ProviderFailure::Transport(_)));
    }

    #[test]
    fn test_message_fallback() {
        assert!(matches!(
            classify_message("error sending request: dns error"),
            CalendarError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            classify_message("Token has been expired or revoked"),
            CalendarError::CredentialRejected(_)
        ));
        assert!(matches!(
            classify_message("Forbidden"),
            CalendarError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_message("something odd"),
            CalendarError::Unknown(_)
        ));
    }
}
