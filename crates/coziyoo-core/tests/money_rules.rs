//! End-to-end arithmetic for the money paths: commission capture, dispute
//! liability, FEFO allocation, and the payment signature contract.

use coziyoo_core::disputes::resolution_adjustment;
use coziyoo_core::finance::commission_for;
use coziyoo_core::lots::{plan_fefo, LotCandidate};
use coziyoo_core::payments::{sign_body, verify_signature};
use coziyoo_core::types::LiabilityParty;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[test]
fn a_189_90_order_at_ten_percent_splits_as_expected() {
    let gross = dec!(189.90);
    let rate = dec!(0.1000);
    let commission = commission_for(gross, rate);
    let net = gross - commission;
    assert_eq!(commission, dec!(18.99));
    assert_eq!(net, dec!(170.91));
    assert_eq!(commission + net, gross);
}

#[test]
fn rate_changes_never_break_the_split_identity() {
    let rates = [dec!(0.0000), dec!(0.0500), dec!(0.1250), dec!(0.9999)];
    let amounts = [dec!(0.01), dec!(9.90), dec!(189.90), dec!(12345.67)];
    for rate in rates {
        for gross in amounts {
            let commission = commission_for(gross, rate);
            assert_eq!(commission, commission.round_dp(2));
            assert!(commission >= dec!(0));
            assert!(commission <= gross, "rate {rate} gross {gross}");
            assert_eq!(commission + (gross - commission), gross);
        }
    }
}

#[test]
fn lost_dispute_with_full_seller_liability_charges_the_total() {
    // A 200.00 refund request already posted -200.00; the lost resolution
    // posts its own authoritative -200.00 on top.
    let request_time = -dec!(200.00);
    let resolution = resolution_adjustment(dec!(200.00), LiabilityParty::Seller, Some(dec!(1)));
    assert_eq!(resolution, dec!(-200.00));
    assert_eq!(request_time + resolution, dec!(-400.00));
}

#[test]
fn shared_liability_splits_and_clamps() {
    assert_eq!(
        resolution_adjustment(dec!(80.00), LiabilityParty::Shared, Some(dec!(0.5))),
        dec!(-40.00)
    );
    assert_eq!(
        resolution_adjustment(dec!(80.00), LiabilityParty::Shared, Some(dec!(3))),
        dec!(-80.00)
    );
    assert_eq!(
        resolution_adjustment(dec!(80.00), LiabilityParty::Platform, Some(dec!(1))),
        dec!(0)
    );
}

#[test]
fn fefo_prefers_the_earlier_expiry_lot() {
    // Lot B expires 2029-12-01 with 5 units; lot A expires 2030-01-01 with
    // 5 units. A 7-unit order takes all of B and 2 of A, leaving stock 3.
    let lot_b = LotCandidate {
        lot_id: Uuid::new_v4(),
        available: 5,
    };
    let lot_a = LotCandidate {
        lot_id: Uuid::new_v4(),
        available: 5,
    };
    let plan = plan_fefo(7, &[lot_b.clone(), lot_a.clone()]).unwrap();
    assert_eq!(plan, vec![(lot_b.lot_id, 5), (lot_a.lot_id, 2)]);

    let remaining: i32 = [lot_b.available, lot_a.available].iter().sum::<i32>()
        - plan.iter().map(|(_, taken)| taken).sum::<i32>();
    assert_eq!(remaining, 3);
}

#[test]
fn fefo_never_over_allocates() {
    let candidates: Vec<LotCandidate> = (0..6)
        .map(|i| LotCandidate {
            lot_id: Uuid::new_v4(),
            available: i,
        })
        .collect();
    let plan = plan_fefo(9, &candidates).unwrap();
    for (lot_id, taken) in &plan {
        let candidate = candidates.iter().find(|c| c.lot_id == *lot_id).unwrap();
        assert!(*taken > 0 && *taken <= candidate.available);
    }
    assert_eq!(plan.iter().map(|(_, taken)| taken).sum::<i32>(), 9);
}

#[test]
fn webhook_signature_binds_secret_and_body() {
    let secret = "whsec_integration_test";
    let body = br#"{"sessionId":"ps_1","providerReferenceId":"R-1","result":"confirmed"}"#;
    let signature = sign_body(secret, body);

    assert!(verify_signature(secret, body, &signature));
    assert!(!verify_signature(secret, b"other body", &signature));
    assert!(!verify_signature("another secret !!", body, &signature));
    // An all-zero signature of the right length still fails.
    assert!(!verify_signature(secret, body, &"00".repeat(32)));
}
