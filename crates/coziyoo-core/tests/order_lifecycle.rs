//! Lifecycle walks over the order state machine and its actor matrix.

use coziyoo_core::orders::{allowed_targets, can_transition, is_terminal, may_drive, Driver};
use coziyoo_core::types::OrderStatus;

const ALL: &[OrderStatus] = &[
    OrderStatus::Draft,
    OrderStatus::PendingSellerApproval,
    OrderStatus::SellerApproved,
    OrderStatus::AwaitingPayment,
    OrderStatus::Paid,
    OrderStatus::Preparing,
    OrderStatus::Ready,
    OrderStatus::InDelivery,
    OrderStatus::Delivered,
    OrderStatus::Completed,
    OrderStatus::Rejected,
    OrderStatus::Cancelled,
    OrderStatus::Refunded,
    OrderStatus::RefundPending,
    OrderStatus::RefundRejected,
    OrderStatus::Expired,
];

#[test]
fn happy_path_walk_reaches_completed() {
    use OrderStatus::*;
    let path = [
        (PendingSellerApproval, SellerApproved, Driver::Seller),
        (SellerApproved, AwaitingPayment, Driver::System),
        (AwaitingPayment, Paid, Driver::System),
        (Paid, Preparing, Driver::Seller),
        (Preparing, Ready, Driver::Seller),
        (Ready, InDelivery, Driver::Seller),
        (InDelivery, Delivered, Driver::Seller),
        (Delivered, Completed, Driver::Buyer),
    ];
    for (from, to, driver) in path {
        assert!(
            may_drive(driver, from, to),
            "{:?} should drive {} -> {}",
            driver,
            from.as_str(),
            to.as_str()
        );
    }
}

#[test]
fn refund_walk_reaches_refunded() {
    use OrderStatus::*;
    assert!(may_drive(Driver::Admin, Paid, RefundPending));
    assert!(may_drive(Driver::Admin, RefundPending, Refunded));
    assert!(may_drive(Driver::Admin, RefundPending, RefundRejected));
    assert!(is_terminal(Refunded));
    assert!(is_terminal(RefundRejected));
}

#[test]
fn no_transition_escapes_a_terminal_state() {
    for &from in ALL {
        if !is_terminal(from) {
            continue;
        }
        for &to in ALL {
            assert!(
                !can_transition(from, to),
                "{} must not reach {}",
                from.as_str(),
                to.as_str()
            );
        }
    }
}

#[test]
fn every_declared_target_is_reachable_by_someone() {
    // A legal edge nobody may drive would be dead weight in the table.
    for &from in ALL {
        for &to in allowed_targets(from) {
            let drivable = [Driver::Buyer, Driver::Seller, Driver::System, Driver::Admin]
                .into_iter()
                .any(|driver| may_drive(driver, from, to));
            assert!(
                drivable,
                "edge {} -> {} has no driver",
                from.as_str(),
                to.as_str()
            );
        }
    }
}

#[test]
fn drivers_never_bypass_the_transition_table() {
    for &from in ALL {
        for &to in ALL {
            if can_transition(from, to) {
                continue;
            }
            for driver in [Driver::Buyer, Driver::Seller, Driver::System, Driver::Admin] {
                assert!(
                    !may_drive(driver, from, to),
                    "{:?} bypassed {} -> {}",
                    driver,
                    from.as_str(),
                    to.as_str()
                );
            }
        }
    }
}

#[test]
fn non_terminal_states_keep_at_least_one_exit() {
    for &status in ALL {
        if !is_terminal(status) {
            assert!(
                !allowed_targets(status).is_empty(),
                "{} is stuck",
                status.as_str()
            );
        }
    }
}
