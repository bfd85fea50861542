//! Property tests over random operation sequences
//!
//! Whatever order operations arrive in, the committed request must keep its
//! assignment and completion fields consistent with its status.

mod fixtures;

use fixtures::*;
use proptest::prelude::*;
use service_dispatch::types::*;

#[derive(Debug, Clone)]
enum Op {
    Accept(usize),
    Reject(usize),
    CancelCustomer,
    CancelProfessional(usize),
    Complete { by_customer: bool, rating: u8 },
    Review(u8),
    AdvanceHours(i64),
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1..=3usize).prop_map(Op::Accept),
        (1..=3usize).prop_map(Op::Reject),
        Just(Op::CancelCustomer),
        (1..=3usize).prop_map(Op::CancelProfessional),
        (any::<bool>(), 0..=6u8).prop_map(|(by_customer, rating)| Op::Complete {
            by_customer,
            rating
        }),
        (0..=6u8).prop_map(Op::Review),
        (1..=30i64).prop_map(Op::AdvanceHours),
        Just(Op::Sweep),
    ]
}

fn assert_consistent(request: &ServiceRequest) {
    match request.status {
        RequestStatus::Accepted
        | RequestStatus::Completed
        | RequestStatus::CanceledByProfessional => assert!(request.professional.is_some()),
        RequestStatus::Requested
        | RequestStatus::Pending
        | RequestStatus::Rejected
        | RequestStatus::Expired => assert!(request.professional.is_none()),
        RequestStatus::CanceledByCustomer => {}
    }

    let completed = request.status == RequestStatus::Completed;
    assert_eq!(request.completed_at.is_some(), completed);
    assert_eq!(request.billed_amount.is_some(), completed);
    assert_eq!(request.rating.is_some(), completed);
    if !completed {
        assert!(request.review.is_none());
    }
    if let Some(rating) = request.rating {
        assert!((1..=5).contains(&rating));
    }
    if let Some(amount) = request.billed_amount {
        assert!(amount >= BASE_PRICE);
    }
}

async fn apply(market: &TestMarketplace, id: RequestId, op: Op) {
    let pro = |n: usize| format!("pro_{}", n);

    // Errors are expected for most random sequences; only state matters
    let _ = match op {
        Op::Accept(n) => market.engine.accept(id, &pro(n)).await.map(|_| ()),
        Op::Reject(n) => market.engine.reject(id, &pro(n)).await.map(|_| ()),
        Op::CancelCustomer => market
            .engine
            .cancel(id, CUSTOMER_ID, ActorRole::Customer)
            .await
            .map(|_| ()),
        Op::CancelProfessional(n) => market
            .engine
            .cancel(id, &pro(n), ActorRole::Professional)
            .await
            .map(|_| ()),
        Op::Complete {
            by_customer,
            rating,
        } => {
            let request = market.engine.get(id).await.unwrap();
            let actor = if by_customer {
                CUSTOMER_ID.to_string()
            } else {
                request.professional.unwrap_or_else(|| pro(1))
            };
            market
                .engine
                .complete(id, &actor, rating, Some("ok".to_string()))
                .await
                .map(|_| ())
        }
        Op::Review(rating) => market
            .engine
            .review(id, CUSTOMER_ID, rating, None)
            .await
            .map(|_| ()),
        Op::AdvanceHours(hours) => {
            market.advance_hours(hours);
            Ok(())
        }
        Op::Sweep => market
            .engine
            .run_expiry_sweep(market.engine.now())
            .await
            .map(|_| ()),
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_status_and_fields_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let market = TestMarketplace::new(3);
            let id = market.book().await;
            let mut previous = market.engine.get(id).await.unwrap();

            for op in ops {
                apply(&market, id, op).await;
                let request = market.engine.get(id).await.unwrap();
                assert_consistent(&request);

                // Terminal states never change status
                if previous.status.is_terminal() {
                    assert_eq!(request.status, previous.status);
                }
                // Once set, the assignment never changes
                if previous.professional.is_some() {
                    assert_eq!(request.professional, previous.professional);
                }
                previous = request;
            }
        });
    }
}
