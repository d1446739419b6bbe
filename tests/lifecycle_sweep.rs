//! Lifecycle transitions driven through the service, including the expiry
//! sweep's per-bundle failure isolation.

use jiff::{Span, Timestamp};
use rusty_money::iso;
use sheaf::{
    bundles::repository::{MockBundleRepository, RepositoryError},
    prelude::*,
};
use testresult::TestResult;

type Service = BundlesService<InMemoryBundleRepository, InMemoryVariantCatalog>;

fn service() -> Service {
    BundlesService::new(InMemoryBundleRepository::new(), InMemoryVariantCatalog::new())
}

fn weekender(service: &Service, slug: &str, window: ValidityWindow) -> NewBundle {
    NewBundle {
        name: format!("Weekender ({slug})"),
        slug: slug.to_owned(),
        discount: DiscountConfig::Fixed { price_minor: 18_00 },
        currency: iso::GBP,
        window,
        items: vec![NewBundleItem {
            variant: service.catalog().add_variant("TENT-2P"),
            quantity: 1,
            unit_price_minor: 20_00,
            display_order: 0,
            weight: 0,
        }],
    }
}

#[tokio::test]
async fn expired_bundle_can_only_return_after_window_extension() -> TestResult {
    let service = service();
    let start = Timestamp::now() - Span::new().hours(48);
    let now = Timestamp::now();

    let closing = ValidityWindow {
        from: Some(start),
        to: Some(start + Span::new().hours(1)),
    };

    let bundle = service.create_bundle(weekender(&service, "weekender", closing), start).await?;
    service.publish_bundle(bundle.uuid, bundle.version, start).await?;

    // The sweep finds the closed window and expires the bundle.
    let outcome = service.expire_due_bundles(now).await?;
    assert_eq!(outcome.expired, vec![bundle.uuid]);

    let expired = service.get_bundle(bundle.uuid).await?;
    assert_eq!(expired.status, BundleStatus::Expired);

    // Restore without extending the window is refused.
    let refused = service.restore_bundle(expired.uuid, expired.version, now).await;
    assert!(
        matches!(refused, Err(BundlesServiceError::WindowNotExtended)),
        "expected WindowNotExtended, got {refused:?}"
    );

    // Extend valid_to, restore, and the bundle is ACTIVE again.
    let extended = service
        .update_bundle(
            expired.uuid,
            expired.version,
            BundleUpdate {
                window: Some(ValidityWindow {
                    from: Some(start),
                    to: Some(now + Span::new().hours(24)),
                }),
                ..BundleUpdate::default()
            },
            now,
        )
        .await?;

    let restored = service.restore_bundle(extended.uuid, extended.version, now).await?;
    assert_eq!(restored.status, BundleStatus::Active);

    // A later sweep leaves it alone.
    let outcome = service.expire_due_bundles(now).await?;
    assert!(outcome.expired.is_empty());

    Ok(())
}

#[tokio::test]
async fn archive_is_terminal_through_the_service() -> TestResult {
    let service = service();
    let now = Timestamp::now();

    let bundle = service
        .create_bundle(weekender(&service, "weekender", ValidityWindow::UNBOUNDED), now)
        .await?;

    let archived = service.archive_bundle(bundle.uuid, bundle.version, now).await?;
    assert_eq!(archived.status, BundleStatus::Archived);

    let publish = service.publish_bundle(archived.uuid, archived.version, now).await;
    assert!(
        matches!(publish, Err(BundlesServiceError::InvalidTransition(_))),
        "expected InvalidTransition, got {publish:?}"
    );

    let update = service
        .update_bundle(archived.uuid, archived.version, BundleUpdate::default(), now)
        .await;
    assert!(
        matches!(update, Err(BundlesServiceError::Archived)),
        "expected Archived, got {update:?}"
    );

    Ok(())
}

#[tokio::test]
async fn sweep_failure_on_one_bundle_does_not_block_the_rest() -> TestResult {
    let now = Timestamp::now();
    let past = now - Span::new().hours(3);

    let window = ValidityWindow {
        from: None,
        to: Some(past),
    };

    let seed = BundlesService::new(InMemoryBundleRepository::new(), InMemoryVariantCatalog::new());

    let mut stuck = Bundle::create(weekender(&seed, "stuck", window), past)?;
    stuck.publish(past)?;

    let mut healthy = Bundle::create(weekender(&seed, "healthy", window), past)?;
    healthy.publish(past)?;
    let healthy_uuid = healthy.uuid;

    let stuck_uuid = stuck.uuid;

    let mut repository = MockBundleRepository::new();

    repository
        .expect_list_active_expiring_before()
        .times(1)
        .return_once(move |_| Ok(vec![stuck, healthy]));

    // The first bundle hits a concurrent edit; the sweep must move on.
    repository
        .expect_update()
        .withf(move |bundle, _| bundle.uuid == stuck_uuid)
        .times(1)
        .returning(|_, _| {
            Err(RepositoryError::VersionConflict {
                expected: 2,
                actual: 3,
            })
        });

    repository
        .expect_update()
        .withf(move |bundle, _| bundle.uuid == healthy_uuid)
        .times(1)
        .returning(|_, _| Ok(()));

    let service = BundlesService::new(repository, InMemoryVariantCatalog::new());

    let outcome = service.expire_due_bundles(now).await?;

    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.expired, vec![healthy_uuid]);

    Ok(())
}

#[tokio::test]
async fn bootstrap_registration_is_idempotent_across_boots() -> TestResult {
    let registry = InMemoryPromotionRegistry::new();

    for _ in 0..3 {
        let rule = ensure_bundle_rule(&registry, Timestamp::now()).await?;
        assert_eq!(rule.code, BUNDLE_RULE_CODE);
    }

    assert_eq!(registry.rule_count(), 1, "re-creation attempts must be no-ops");

    Ok(())
}
