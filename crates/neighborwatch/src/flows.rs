//! User-facing actions built from the store, the session and the device.
//!
//! Each function is one screen action: it validates input, gathers what it
//! needs from the device collaborators and writes to the store.

use tracing::info;

use crate::chat::{panic_alert, ChatMessage, OutgoingMessage};
use crate::device::{locate, Geolocator};
use crate::error::{Error, Result};
use crate::heatmap::{bucket_reports, HeatBucket};
use crate::report::{Category, Comment, Report, ReportDraft, VoteKind};
use crate::session::{Auth, Session, SignUpForm, UserProfile};
use crate::storage::SharedStorage;

/// Register an account, locating the device first unless `use_location` is off.
///
/// # Errors
///
/// Returns `Error::PermissionDenied` when location access is refused, so the
/// caller can offer to register without location.
pub async fn register(
    auth: &Auth,
    geolocator: &dyn Geolocator,
    form: &SignUpForm,
    use_location: bool,
) -> Result<UserProfile> {
    let location = if use_location {
        if !geolocator.request_permission().await.is_granted() {
            return Err(Error::permission_denied(
                "location",
                "A location is needed to assign your zone; register with --no-location to skip it",
            ));
        }
        let coords = geolocator.current_position().await?;
        let place = geolocator.reverse_geocode(coords).await?;
        Some((coords, place))
    } else {
        None
    };

    auth.sign_up(form, location).await
}

/// Validate a report, attach the device position and store it.
///
/// # Errors
///
/// Returns a validation error before touching the device, or
/// `Error::PermissionDenied` when location access is refused.
pub async fn submit_report(
    storage: &SharedStorage,
    geolocator: &dyn Geolocator,
    draft: &ReportDraft,
) -> Result<Report> {
    draft.validate()?;
    let coords = locate(geolocator).await?;
    storage.lock().await.insert_report(draft, Some(coords))
}

/// Broadcast a panic alert with the device position to `zone`.
///
/// # Errors
///
/// Returns `Error::NotSignedIn` or `Error::PermissionDenied`.
pub async fn send_panic(
    storage: &SharedStorage,
    geolocator: &dyn Geolocator,
    session: &Session,
    zone: &str,
) -> Result<ChatMessage> {
    let user = session.require_user()?;
    let coords = locate(geolocator).await?;
    let message = storage
        .lock()
        .await
        .send_message(&panic_alert(zone, user.chat_user(), coords))?;

    info!(message_id = message.id, zone, "Panic alert sent");
    Ok(message)
}

/// Post a text message to `zone`.
///
/// # Errors
///
/// Returns `Error::NotSignedIn` or a validation error for blank text.
pub async fn send_chat(
    storage: &SharedStorage,
    session: &Session,
    zone: &str,
    text: &str,
) -> Result<ChatMessage> {
    let user = session.require_user()?;
    let message = OutgoingMessage::text(zone, user.chat_user(), text.trim())?;
    storage.lock().await.send_message(&message)
}

/// Confirm or deny a report as the signed-in user.
///
/// # Errors
///
/// Returns `Error::NotSignedIn` or `Error::NotFound`.
pub async fn vote(
    storage: &SharedStorage,
    session: &Session,
    report_id: i64,
    kind: VoteKind,
) -> Result<Report> {
    let user = session.require_user()?;
    storage.lock().await.vote(report_id, &user.uid, kind)
}

/// Comment on a report, signed with the user's name when signed in.
///
/// # Errors
///
/// Returns a validation error for blank text or `Error::NotFound`.
pub async fn comment(
    storage: &SharedStorage,
    session: &Session,
    report_id: i64,
    text: &str,
) -> Result<Comment> {
    let author = session.current().map(|u| u.display_name.as_str());
    storage.lock().await.add_comment(report_id, text, author)
}

/// Heat buckets for the reports shown on the map.
#[must_use]
pub fn heat_buckets(reports: &[Report], category: Option<Category>, precision: u32) -> Vec<HeatBucket> {
    bucket_reports(
        reports
            .iter()
            .filter(|r| category.map_or(true, |c| r.category == c)),
        precision,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationConfig;
    use crate::device::{ConsoleNotifier, FixedGeolocator, PermissionStatus, Place, UNSPECIFIED_ZONE};
    use crate::report::Coordinates;
    use crate::storage::Storage;

    const HERE: Coordinates = Coordinates::new(-0.180_653, -78.467_834);

    fn geolocator(permission: PermissionStatus) -> FixedGeolocator {
        FixedGeolocator::new(
            permission,
            HERE,
            Place::new(Some("Quito".into()), Some("La Mariscal".into())),
        )
    }

    fn form() -> SignUpForm {
        SignUpForm {
            name: "Ana".into(),
            email: "ana@example.com".into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        }
    }

    async fn signed_in(storage: &SharedStorage) -> Session {
        let auth = Auth::new(storage.clone());
        register(&auth, &geolocator(PermissionStatus::Granted), &form(), true)
            .await
            .unwrap();
        let notifier = ConsoleNotifier::new(&NotificationConfig::default(), "t");
        auth.sign_in("ana@example.com", "secret1", &notifier)
            .await
            .unwrap();
        auth.session()
    }

    fn report_at(id: i64, category: Category, coords: Option<Coordinates>) -> Report {
        Report {
            id,
            category,
            description: None,
            reporter_name: None,
            coords,
            created_at: chrono::Utc::now(),
            confirm_votes: std::collections::BTreeSet::new(),
            deny_votes: std::collections::BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_register_with_location() {
        let auth = Auth::new(Storage::open_in_memory().unwrap().into_shared());
        let profile = register(&auth, &geolocator(PermissionStatus::Granted), &form(), true)
            .await
            .unwrap();
        assert_eq!(profile.zone, "Quito - La Mariscal");
        assert_eq!(profile.home, Some(HERE));
    }

    #[tokio::test]
    async fn test_register_location_denied() {
        let auth = Auth::new(Storage::open_in_memory().unwrap().into_shared());
        let geo = geolocator(PermissionStatus::Denied);

        let err = register(&auth, &geo, &form(), true).await.unwrap_err();
        assert!(err.is_permission_error());

        let profile = register(&auth, &geo, &form(), false).await.unwrap();
        assert_eq!(profile.zone, UNSPECIFIED_ZONE);
    }

    #[tokio::test]
    async fn test_submit_report_uses_device_position() {
        let storage = Storage::open_in_memory().unwrap().into_shared();
        let draft = ReportDraft::new(Category::Harassment, "Followed home");

        let report = submit_report(&storage, &geolocator(PermissionStatus::Granted), &draft)
            .await
            .unwrap();
        assert_eq!(report.coords, Some(HERE));
        assert_eq!(report.reporter_name.as_deref(), Some("Anonymous"));
    }

    #[tokio::test]
    async fn test_submit_report_validation_before_location() {
        let storage = Storage::open_in_memory().unwrap().into_shared();
        let draft = ReportDraft::new(Category::Robbery, " ");

        // Validation wins even when location would be denied.
        let err = submit_report(&storage, &geolocator(PermissionStatus::Denied), &draft)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let draft = ReportDraft::new(Category::Robbery, "Bag stolen");
        let err = submit_report(&storage, &geolocator(PermissionStatus::Denied), &draft)
            .await
            .unwrap_err();
        assert!(err.is_permission_error());
        assert_eq!(storage.lock().await.count_reports().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_panic() {
        let storage = Storage::open_in_memory().unwrap().into_shared();
        let session = signed_in(&storage).await;
        let zone = session.zone("default_zone");

        let message = send_panic(
            &storage,
            &geolocator(PermissionStatus::Granted),
            &session,
            &zone,
        )
        .await
        .unwrap();

        assert!(message.is_panic());
        assert_eq!(message.zone, "Quito - La Mariscal");
        assert!(message.text.starts_with("🚨 PANIC ALERT! 🚨\nLocation: (-0.1807, -78.4678)\nUser: Ana\n"));
        assert_eq!(message.location, Some(HERE));
    }

    #[tokio::test]
    async fn test_send_panic_requires_user() {
        let storage = Storage::open_in_memory().unwrap().into_shared();
        let err = send_panic(
            &storage,
            &geolocator(PermissionStatus::Granted),
            &Session::default(),
            "default_zone",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotSignedIn));
    }

    #[tokio::test]
    async fn test_send_chat() {
        let storage = Storage::open_in_memory().unwrap().into_shared();
        let session = signed_in(&storage).await;

        let message = send_chat(&storage, &session, "north", "  hola  ").await.unwrap();
        assert_eq!(message.text, "hola");
        assert_eq!(message.sender.name, "Ana");

        assert!(send_chat(&storage, &session, "north", "")
            .await
            .unwrap_err()
            .is_validation_error());
        assert!(matches!(
            send_chat(&storage, &Session::default(), "north", "hi").await,
            Err(Error::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_vote_and_comment() {
        let storage = Storage::open_in_memory().unwrap().into_shared();
        let session = signed_in(&storage).await;
        let report = submit_report(
            &storage,
            &geolocator(PermissionStatus::Granted),
            &ReportDraft::new(Category::Robbery, "x"),
        )
        .await
        .unwrap();

        let voted = vote(&storage, &session, report.id, VoteKind::Deny).await.unwrap();
        assert_eq!(voted.deny_count(), 1);
        assert!(matches!(
            vote(&storage, &Session::default(), report.id, VoteKind::Deny).await,
            Err(Error::NotSignedIn)
        ));

        let signed = comment(&storage, &session, report.id, "I saw it").await.unwrap();
        assert_eq!(signed.author, "Ana");
        let anonymous = comment(&storage, &Session::default(), report.id, "me too")
            .await
            .unwrap();
        assert_eq!(anonymous.author, "Anonymous");
    }

    #[test]
    fn test_heat_buckets_filters_category() {
        let a = Coordinates::new(-0.18, -78.47);
        let reports = vec![
            report_at(1, Category::Robbery, Some(a)),
            report_at(2, Category::Robbery, Some(a)),
            report_at(3, Category::Assault, Some(a)),
            report_at(4, Category::Robbery, None),
        ];

        let all = heat_buckets(&reports, None, 4);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].weight, 3);

        let robberies = heat_buckets(&reports, Some(Category::Robbery), 4);
        assert_eq!(robberies[0].weight, 2);

        assert!(heat_buckets(&reports, Some(Category::Other), 4).is_empty());
    }
}
