use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    error::{AppError, AppResult, ChargeRuleError},
    models::{
        ChargeProvision, NewChargeProvision, ProvisionFinalization, ProvisionStatus,
        Regularization, RegularizationStatus, RegularizationStatusUpdate,
    },
    money::Money,
    repository::charge_store::ChargeStore,
    schemas::{CreateProvisionInput, FinalizeProvisionInput},
    services::{
        deposit_retention::{reconcile_provision_refund, RetentionOutcome},
        lease_locks::LeaseLocks,
        notifications::{self, dispatch_best_effort, Notifier},
    },
    tenancy::{load_lease, load_owned_lease, load_visible_lease},
};

/// Share of the security deposit that may be held back for charges.
pub const DEPOSIT_CAP_RATIO: Decimal = Decimal::from_parts(20, 0, 0, false, 2);

pub fn max_provision_amount(deposit: Money) -> Money {
    deposit.scale(DEPOSIT_CAP_RATIO)
}

/// Checks the requested amount against the deposit and returns the cap.
pub fn check_provision_amount(requested: Money, deposit: Money) -> Result<Money, ChargeRuleError> {
    if !requested.is_positive() {
        return Err(ChargeRuleError::NonPositiveProvision);
    }
    let max_allowed = max_provision_amount(deposit);
    if requested > max_allowed {
        return Err(ChargeRuleError::ExceedsDepositCap {
            requested,
            max_allowed,
            deposit,
        });
    }
    Ok(max_allowed)
}

/// `explicit` wins when given. Otherwise the refund is the provision minus the
/// final balance, signed: a negative value records what the tenant still owes
/// and never touches the deposit retention.
pub fn refund_amount(
    provision_amount: Money,
    final_balance: Money,
    explicit: Option<Money>,
) -> Money {
    explicit.unwrap_or(provision_amount - final_balance)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionWithRegularization {
    #[serde(flatten)]
    pub provision: ChargeProvision,
    pub regularization: Option<Regularization>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionFinalizationOutcome {
    pub provision: ChargeProvision,
    pub refund_amount: Money,
    pub deposit_retention: RetentionOutcome,
}

pub async fn create_provision<S: ChargeStore, N: Notifier>(
    store: &S,
    notifier: &N,
    locks: &LeaseLocks,
    actor_user_id: &str,
    lease_id: &str,
    input: &CreateProvisionInput,
    today: NaiveDate,
) -> AppResult<ChargeProvision> {
    let lease = load_owned_lease(store, lease_id, actor_user_id).await?;
    let max_allowed = check_provision_amount(input.provision_amount, lease.security_deposit)?;

    let guard = locks.acquire(&lease.id).await;
    if let Some(existing) = store.find_active_provision(&lease.id).await? {
        return Err(ChargeRuleError::ActiveProvisionExists {
            provision_id: existing.id,
        }
        .into());
    }

    let record = NewChargeProvision {
        lease_id: lease.id.clone(),
        provision_amount: input.provision_amount,
        max_allowed_amount: max_allowed,
        deposit_amount: lease.security_deposit,
        supporting_documents: input.supporting_documents.clone(),
        justification_notes: input
            .justification_notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string),
        provision_date: input.provision_date.unwrap_or(today),
        expected_finalization_date: input.expected_finalization_date,
        status: ProvisionStatus::Active,
        created_by_user_id: Some(actor_user_id.to_string()),
    };
    let provision = store.insert_provision(&record).await?;
    drop(guard);

    tracing::info!(
        lease_id = %lease.id,
        provision_id = %provision.id,
        amount = %provision.provision_amount,
        max_allowed = %max_allowed,
        "Charge provision created"
    );
    dispatch_best_effort(notifier, notifications::provision_created(&lease, &provision)).await;
    Ok(provision)
}

pub async fn finalize_provision<S: ChargeStore, N: Notifier>(
    store: &S,
    notifier: &N,
    locks: &LeaseLocks,
    actor_user_id: &str,
    lease_id: &str,
    input: &FinalizeProvisionInput,
    today: NaiveDate,
) -> AppResult<ProvisionFinalizationOutcome> {
    let lease = load_owned_lease(store, lease_id, actor_user_id).await?;
    let regularization = store
        .get_regularization(&input.regularization_id)
        .await?
        .ok_or_else(|| AppError::NotFound("charge_regularizations record not found.".to_string()))?;
    if regularization.lease_id() != lease.id {
        return Err(ChargeRuleError::LeaseMismatch.into());
    }
    if regularization.status == RegularizationStatus::Finalized {
        return Err(ChargeRuleError::RegularizationStatus {
            current: regularization.status,
            expected: "draft or sent",
        }
        .into());
    }

    let guard = locks.acquire(&lease.id).await;
    let provision = match input.provision_id.as_deref() {
        Some(provision_id) => {
            let provision = store.get_provision(provision_id).await?.ok_or_else(|| {
                AppError::NotFound("charge_provisions record not found.".to_string())
            })?;
            if provision.lease_id != lease.id {
                return Err(ChargeRuleError::LeaseMismatch.into());
            }
            provision
        }
        None => store
            .find_active_provision(&lease.id)
            .await?
            .ok_or(ChargeRuleError::NoActiveProvision)?,
    };
    if provision.status != ProvisionStatus::Active {
        return Err(ChargeRuleError::ProvisionNotActive {
            status: provision.status,
        }
        .into());
    }

    let refund = refund_amount(
        provision.provision_amount,
        input.final_balance,
        input.refund_amount,
    );
    let finalization = ProvisionFinalization {
        status: ProvisionStatus::Finalized,
        final_regularization_id: regularization.id.clone(),
        final_balance: input.final_balance,
        refund_amount: refund,
        finalization_date: input.finalization_date.unwrap_or(today),
    };
    let finalized = store
        .finalize_provision(&provision.id, &finalization)
        .await?
        .ok_or(ChargeRuleError::ProvisionNotActive {
            status: ProvisionStatus::Finalized,
        })?;
    drop(guard);

    tracing::info!(
        lease_id = %lease.id,
        provision_id = %finalized.id,
        regularization_id = %regularization.id,
        final_balance = %input.final_balance,
        refund = %refund,
        "Charge provision finalized"
    );

    let update = RegularizationStatusUpdate {
        status: RegularizationStatus::Finalized,
        document_path: None,
        sent_at: None,
        finalized_at: Some(Utc::now()),
    };
    if let Err(error) = store
        .update_regularization_status(&regularization.id, &update)
        .await
    {
        tracing::warn!(
            regularization_id = %regularization.id,
            %error,
            "Could not mark regularization finalized"
        );
    }

    let deposit_retention = reconcile_provision_refund(store, &lease.id, &finalized.id, refund).await;
    dispatch_best_effort(
        notifier,
        notifications::provision_finalized(&lease, &finalized, refund),
    )
    .await;

    Ok(ProvisionFinalizationOutcome {
        provision: finalized,
        refund_amount: refund,
        deposit_retention,
    })
}

/// Provisions of a lease, newest first, each with its final regularization.
pub async fn list_provisions<S: ChargeStore>(
    store: &S,
    actor_user_id: &str,
    lease_id: &str,
) -> AppResult<Vec<ProvisionWithRegularization>> {
    let lease = load_visible_lease(store, lease_id, actor_user_id).await?;
    let provisions = store.list_provisions(&lease.id).await?;
    let regularizations = store.list_regularizations(&lease.id, None).await?;

    Ok(provisions
        .into_iter()
        .map(|provision| {
            let regularization = provision
                .final_regularization_id
                .as_deref()
                .and_then(|id| regularizations.iter().find(|item| item.id == id))
                .cloned();
            ProvisionWithRegularization {
                provision,
                regularization,
            }
        })
        .collect())
}

pub async fn get_provision<S: ChargeStore>(
    store: &S,
    actor_user_id: &str,
    provision_id: &str,
) -> AppResult<ChargeProvision> {
    let provision = store
        .get_provision(provision_id)
        .await?
        .ok_or_else(|| AppError::NotFound("charge_provisions record not found.".to_string()))?;
    load_visible_lease(store, &provision.lease_id, actor_user_id).await?;
    Ok(provision)
}

/// Remind owners of active provisions due for finalization. Returns how many
/// reminders were delivered; skipped or failed sends are not counted.
pub async fn remind_overdue_provisions<S: ChargeStore, N: Notifier>(
    store: &S,
    notifier: &N,
    today: NaiveDate,
) -> AppResult<usize> {
    let overdue = store.list_overdue_provisions(today).await?;
    let mut reminded = 0;
    for provision in overdue {
        let lease = match load_lease(store, &provision.lease_id).await {
            Ok(lease) => lease,
            Err(error) => {
                tracing::warn!(
                    provision_id = %provision.id,
                    %error,
                    "Skipping reminder: lease unavailable"
                );
                continue;
            }
        };
        if dispatch_best_effort(
            notifier,
            notifications::provision_finalization_due(&lease, &provision, today),
        )
        .await
        {
            reminded += 1;
        }
    }
    Ok(reminded)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        models::{
            BalanceType, DepositRetention, Lease, NewRegularization, RegularizationFigures,
        },
        repository::memory_store::MemoryChargeStore,
        services::notifications::{testing::RecordingNotifier, NotificationEvent},
    };

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn lease(id: &str, deposit: i64) -> Lease {
        Lease {
            id: id.to_string(),
            owner_user_id: "owner-1".to_string(),
            tenant_user_id: Some("tenant-1".to_string()),
            tenant_full_name: Some("Camille Martin".to_string()),
            tenant_email: Some("camille@example.com".to_string()),
            starts_on: date("2024-01-01"),
            ends_on: None,
            monthly_rent: Money::from(800),
            monthly_charges: Money::from(75),
            security_deposit: Money::from(deposit),
            property_label: None,
        }
    }

    fn store_with_lease(deposit: i64) -> MemoryChargeStore {
        let store = MemoryChargeStore::default();
        store.put_lease(lease("lease-1", deposit));
        store
    }

    fn create_input(amount: i64) -> CreateProvisionInput {
        CreateProvisionInput {
            provision_amount: Money::from(amount),
            justification_notes: Some("Charges 2025 non encore arrêtées".to_string()),
            expected_finalization_date: Some(date("2026-06-30")),
            provision_date: None,
            supporting_documents: Vec::new(),
        }
    }

    fn finalize_input(regularization_id: &str, balance: i64) -> FinalizeProvisionInput {
        FinalizeProvisionInput {
            regularization_id: regularization_id.to_string(),
            final_balance: Money::from(balance),
            refund_amount: None,
            finalization_date: None,
            provision_id: None,
        }
    }

    async fn regularization(store: &MemoryChargeStore, lease_id: &str, balance: i64) -> String {
        let figures = RegularizationFigures {
            lease_id: lease_id.to_string(),
            year: 2025,
            provisions_period_start: date("2025-01-01"),
            provisions_period_end: date("2025-12-31"),
            occupancy_start: date("2025-01-01"),
            occupancy_end: date("2025-12-31"),
            days_occupied: 365,
            days_in_year: 365,
            occupancy_ratio: Decimal::ONE,
            theoretical_provisions: Money::from(900),
            total_provisions_collected: Money::from(900),
            receipt_count: 12,
            total_real_charges: Money::from(1000),
            recoverable_charges: Money::from(780),
            non_recoverable_charges: Money::from(220),
            tenant_share: Money::from(780),
            balance: Money::from(balance),
            balance_type: BalanceType::from_balance(Money::from(balance)),
            calculation_notes: None,
        };
        store
            .insert_regularization(&NewRegularization {
                figures,
                status: RegularizationStatus::Sent,
                created_by_user_id: Some("owner-1".to_string()),
            })
            .await
            .expect("regularization stored")
            .id
    }

    #[test]
    fn cap_is_a_fifth_of_the_deposit() {
        assert_eq!(max_provision_amount(Money::from(1000)), Money::from(200));
        assert_eq!(
            max_provision_amount(Money::new(dec!(1234.56))).as_decimal(),
            dec!(246.91)
        );
        assert_eq!(
            check_provision_amount(Money::from(200), Money::from(1000)),
            Ok(Money::from(200))
        );
    }

    #[test]
    fn refund_is_signed_and_an_explicit_value_wins() {
        assert_eq!(
            refund_amount(Money::from(150), Money::from(120), None),
            Money::from(30)
        );
        assert_eq!(
            refund_amount(Money::from(150), Money::from(180), None),
            -Money::from(30)
        );
        assert_eq!(
            refund_amount(Money::from(150), Money::from(120), Some(Money::from(45))),
            Money::from(45)
        );
        assert_eq!(
            refund_amount(Money::from(150), Money::from(120), Some(-Money::from(1))),
            -Money::from(1)
        );
    }

    #[tokio::test]
    async fn provision_above_cap_is_rejected_without_persisting() {
        let store = store_with_lease(1000);
        let notifier = RecordingNotifier::default();
        let error = create_provision(
            &store,
            &notifier,
            &LeaseLocks::default(),
            "owner-1",
            "lease-1",
            &create_input(250),
            date("2026-01-15"),
        )
        .await
        .expect_err("above cap");

        match error {
            AppError::ChargeRule(ChargeRuleError::ExceedsDepositCap { max_allowed, .. }) => {
                assert_eq!(max_allowed, Money::from(200));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.provisions().is_empty());
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn zero_provision_is_rejected() {
        let store = store_with_lease(1000);
        let error = create_provision(
            &store,
            &RecordingNotifier::default(),
            &LeaseLocks::default(),
            "owner-1",
            "lease-1",
            &create_input(0),
            date("2026-01-15"),
        )
        .await
        .expect_err("zero amount");
        assert!(matches!(
            error,
            AppError::ChargeRule(ChargeRuleError::NonPositiveProvision)
        ));
    }

    #[tokio::test]
    async fn only_the_owner_can_create() {
        let store = store_with_lease(1000);
        let error = create_provision(
            &store,
            &RecordingNotifier::default(),
            &LeaseLocks::default(),
            "tenant-1",
            "lease-1",
            &create_input(150),
            date("2026-01-15"),
        )
        .await
        .expect_err("tenant cannot create");
        assert!(matches!(error, AppError::Forbidden(_)));
        assert!(store.provisions().is_empty());
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_creation() {
        let store = store_with_lease(1000);
        let notifier = RecordingNotifier::failing();
        let provision = create_provision(
            &store,
            &notifier,
            &LeaseLocks::default(),
            "owner-1",
            "lease-1",
            &create_input(150),
            date("2026-01-15"),
        )
        .await
        .expect("created despite notifier failure");
        assert_eq!(provision.status, ProvisionStatus::Active);
        assert_eq!(provision.provision_date, date("2026-01-15"));
        assert_eq!(notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_leave_one_active_provision() {
        let store = store_with_lease(1000);
        let notifier = RecordingNotifier::default();
        let locks = LeaseLocks::default();
        let today = date("2026-01-15");
        let first_input = create_input(150);
        let second_input = create_input(100);

        let (first, second) = tokio::join!(
            create_provision(&store, &notifier, &locks, "owner-1", "lease-1", &first_input, today),
            create_provision(&store, &notifier, &locks, "owner-1", "lease-1", &second_input, today),
        );
        assert_eq!(
            [first.is_ok(), second.is_ok()]
                .iter()
                .filter(|ok| **ok)
                .count(),
            1
        );
        assert_eq!(store.provisions().len(), 1);
    }

    #[tokio::test]
    async fn provision_lifecycle_from_creation_to_refund() {
        let store = store_with_lease(1000);
        store.put_deposit_retention(DepositRetention {
            id: "ret-1".to_string(),
            lease_id: "lease-1".to_string(),
            deposit_amount: Money::from(1000),
            retention_lines: Vec::new(),
            total_retained: Money::from(500),
            amount_to_refund: Money::from(500),
        });
        let notifier = RecordingNotifier::default();
        let locks = LeaseLocks::default();
        let today = date("2026-03-01");

        let provision = create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(150),
            today,
        )
        .await
        .expect("first provision");
        assert_eq!(provision.max_allowed_amount, Money::from(200));
        assert_eq!(provision.deposit_amount, Money::from(1000));

        let second = create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(50),
            today,
        )
        .await
        .expect_err("second active provision");
        assert!(matches!(
            second,
            AppError::ChargeRule(ChargeRuleError::ActiveProvisionExists { ref provision_id })
                if *provision_id == provision.id
        ));

        let regularization_id = regularization(&store, "lease-1", 120).await;
        let outcome = finalize_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &finalize_input(&regularization_id, 120),
            today,
        )
        .await
        .expect("finalized");

        assert_eq!(outcome.refund_amount, Money::from(30));
        assert_eq!(outcome.provision.status, ProvisionStatus::Finalized);
        assert_eq!(outcome.provision.final_balance, Some(Money::from(120)));
        assert_eq!(outcome.provision.finalization_date, Some(today));
        assert_eq!(
            outcome.provision.final_regularization_id.as_deref(),
            Some(regularization_id.as_str())
        );
        assert_eq!(
            outcome.deposit_retention,
            RetentionOutcome::Applied {
                retention_id: "ret-1".to_string(),
                total_retained: Money::from(470),
                amount_to_refund: Money::from(530),
            }
        );

        let stored = store
            .get_regularization(&regularization_id)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stored.status, RegularizationStatus::Finalized);
        assert!(stored.finalized_at.is_some());

        let events = notifier
            .events()
            .into_iter()
            .map(|notification| notification.event)
            .collect::<Vec<_>>();
        assert_eq!(
            events,
            vec![
                NotificationEvent::ProvisionCreated,
                NotificationEvent::ProvisionFinalized
            ]
        );
    }

    #[tokio::test]
    async fn finalizing_twice_is_rejected_without_mutation() {
        let store = store_with_lease(1000);
        let notifier = RecordingNotifier::default();
        let locks = LeaseLocks::default();
        let today = date("2026-03-01");
        let provision = create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(150),
            today,
        )
        .await
        .expect("created");
        let regularization_id = regularization(&store, "lease-1", 120).await;
        let mut input = finalize_input(&regularization_id, 120);
        input.provision_id = Some(provision.id.clone());
        finalize_provision(&store, &notifier, &locks, "owner-1", "lease-1", &input, today)
            .await
            .expect("first finalization");

        let other_regularization = regularization(&store, "lease-1", 0).await;
        let mut retry = finalize_input(&other_regularization, 0);
        retry.provision_id = Some(provision.id.clone());
        let error = finalize_provision(&store, &notifier, &locks, "owner-1", "lease-1", &retry, today)
            .await
            .expect_err("already finalized");
        assert!(matches!(
            error,
            AppError::ChargeRule(ChargeRuleError::ProvisionNotActive {
                status: ProvisionStatus::Finalized
            })
        ));

        let stored = store
            .get_provision(&provision.id)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stored.refund_amount, Some(Money::from(30)));
        assert_eq!(
            stored.final_regularization_id.as_deref(),
            Some(regularization_id.as_str())
        );
    }

    #[tokio::test]
    async fn finalize_without_active_provision_is_a_conflict() {
        let store = store_with_lease(1000);
        let regularization_id = regularization(&store, "lease-1", 120).await;
        let error = finalize_provision(
            &store,
            &RecordingNotifier::default(),
            &LeaseLocks::default(),
            "owner-1",
            "lease-1",
            &finalize_input(&regularization_id, 120),
            date("2026-03-01"),
        )
        .await
        .expect_err("nothing to finalize");
        assert!(matches!(
            error,
            AppError::ChargeRule(ChargeRuleError::NoActiveProvision)
        ));
    }

    #[tokio::test]
    async fn regularization_of_another_lease_is_rejected() {
        let store = store_with_lease(1000);
        store.put_lease(lease("lease-2", 1000));
        let notifier = RecordingNotifier::default();
        let locks = LeaseLocks::default();
        let today = date("2026-03-01");
        create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(150),
            today,
        )
        .await
        .expect("created");
        let foreign = regularization(&store, "lease-2", 120).await;

        let error = finalize_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &finalize_input(&foreign, 120),
            today,
        )
        .await
        .expect_err("mismatched lease");
        assert!(matches!(
            error,
            AppError::ChargeRule(ChargeRuleError::LeaseMismatch)
        ));
        assert_eq!(
            store.provisions()[0].status,
            ProvisionStatus::Active
        );
    }

    #[tokio::test]
    async fn zero_refund_still_notifies_the_tenant() {
        let store = store_with_lease(1000);
        let notifier = RecordingNotifier::default();
        let locks = LeaseLocks::default();
        let today = date("2026-03-01");
        create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(150),
            today,
        )
        .await
        .expect("created");
        let regularization_id = regularization(&store, "lease-1", 150).await;

        let outcome = finalize_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &finalize_input(&regularization_id, 150),
            today,
        )
        .await
        .expect("finalized");
        assert_eq!(outcome.refund_amount, Money::ZERO);
        assert_eq!(outcome.deposit_retention, RetentionOutcome::NotApplicable);
        assert_eq!(
            notifier.events().last().map(|notification| notification.event),
            Some(NotificationEvent::ProvisionFinalized)
        );
    }

    #[tokio::test]
    async fn listing_joins_the_final_regularization() {
        let store = store_with_lease(1000);
        let notifier = RecordingNotifier::default();
        let locks = LeaseLocks::default();
        let today = date("2026-03-01");
        create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(150),
            today,
        )
        .await
        .expect("created");
        let regularization_id = regularization(&store, "lease-1", 120).await;
        finalize_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &finalize_input(&regularization_id, 120),
            today,
        )
        .await
        .expect("finalized");
        create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(100),
            today,
        )
        .await
        .expect("new provision after finalization");

        let listed = list_provisions(&store, "tenant-1", "lease-1")
            .await
            .expect("tenant can read");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].provision.status, ProvisionStatus::Active);
        assert!(listed[0].regularization.is_none());
        assert_eq!(
            listed[1]
                .regularization
                .as_ref()
                .map(|regularization| regularization.id.as_str()),
            Some(regularization_id.as_str())
        );

        let stranger = list_provisions(&store, "someone-else", "lease-1").await;
        assert!(matches!(stranger, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn overdue_provisions_remind_the_owner() {
        let store = store_with_lease(1000);
        let notifier = RecordingNotifier::default();
        create_provision(
            &store,
            &notifier,
            &LeaseLocks::default(),
            "owner-1",
            "lease-1",
            &create_input(150),
            date("2026-01-15"),
        )
        .await
        .expect("created");

        let early = remind_overdue_provisions(&store, &notifier, date("2026-06-29"))
            .await
            .expect("scan");
        assert_eq!(early, 0);

        let due = remind_overdue_provisions(&store, &notifier, date("2026-07-01"))
            .await
            .expect("scan");
        assert_eq!(due, 1);
        let reminder = notifier.events().pop().expect("reminder sent");
        assert_eq!(reminder.event, NotificationEvent::ProvisionFinalizationDue);
        assert_eq!(reminder.recipient_user_id.as_deref(), Some("owner-1"));
    }

    #[tokio::test]
    async fn failed_reminders_are_not_counted() {
        let store = store_with_lease(1000);
        create_provision(
            &store,
            &RecordingNotifier::default(),
            &LeaseLocks::default(),
            "owner-1",
            "lease-1",
            &create_input(150),
            date("2026-01-15"),
        )
        .await
        .expect("created");

        let notifier = RecordingNotifier::failing();
        let reminded = remind_overdue_provisions(&store, &notifier, date("2026-07-01"))
            .await
            .expect("scan");
        assert_eq!(reminded, 0);
        assert_eq!(notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn balance_above_the_provision_stores_a_negative_refund() {
        let store = store_with_lease(1000);
        store.put_deposit_retention(DepositRetention {
            id: "ret-1".to_string(),
            lease_id: "lease-1".to_string(),
            deposit_amount: Money::from(1000),
            retention_lines: Vec::new(),
            total_retained: Money::from(500),
            amount_to_refund: Money::from(500),
        });
        let notifier = RecordingNotifier::default();
        let locks = LeaseLocks::default();
        let today = date("2026-03-01");
        let provision = create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(150),
            today,
        )
        .await
        .expect("created");
        let regularization_id = regularization(&store, "lease-1", 180).await;

        let outcome = finalize_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &finalize_input(&regularization_id, 180),
            today,
        )
        .await
        .expect("finalized");
        assert_eq!(outcome.refund_amount, -Money::from(30));
        assert_eq!(outcome.deposit_retention, RetentionOutcome::NotApplicable);

        let stored = store
            .get_provision(&provision.id)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stored.refund_amount, Some(-Money::from(30)));

        let retention = store
            .get_deposit_retention("lease-1")
            .await
            .expect("read")
            .expect("exists");
        assert!(retention.retention_lines.is_empty());
        assert_eq!(retention.total_retained, Money::from(500));
        assert_eq!(retention.amount_to_refund, Money::from(500));

        let message = notifier.events().pop().expect("finalization notice");
        assert_eq!(message.event, NotificationEvent::ProvisionFinalized);
        assert!(message.body.contains("aucun remboursement"));
    }

    #[tokio::test]
    async fn regularization_status_failure_does_not_undo_finalization() {
        let store = store_with_lease(1000);
        let notifier = RecordingNotifier::default();
        let locks = LeaseLocks::default();
        create_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &create_input(150),
            date("2026-01-15"),
        )
        .await
        .expect("provision created");
        let regularization_id = regularization(&store, "lease-1", 120).await;

        store.fail_regularization_writes(true);
        let outcome = finalize_provision(
            &store,
            &notifier,
            &locks,
            "owner-1",
            "lease-1",
            &finalize_input(&regularization_id, 120),
            date("2026-03-01"),
        )
        .await
        .expect("finalization succeeds");

        assert_eq!(outcome.provision.status, ProvisionStatus::Finalized);
        let stored = store
            .get_regularization(&regularization_id)
            .await
            .expect("lookup")
            .expect("regularization exists");
        assert_eq!(stored.status, RegularizationStatus::Sent);
    }
}
