//! Property tests for the RFM aggregation invariants

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use riskforge::{aggregate, Transaction};
use std::collections::{BTreeMap, BTreeSet};

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn arb_transaction() -> impl Strategy<Value = Transaction> {
    (
        0u8..6,
        -500i32..5_000,
        0i64..(90 * 24 * 60),
        prop_oneof![Just("Web"), Just("Mobile"), Just("Pos")],
    )
        .prop_map(|(customer, cents, minutes, channel)| Transaction {
            transaction_id: format!("T{customer}-{minutes}"),
            customer_id: format!("C{customer}"),
            amount: f64::from(cents) / 4.0,
            start_time: base_time() + Duration::minutes(minutes),
            channel_id: channel.to_string(),
        })
}

proptest! {
    #[test]
    fn one_row_per_distinct_customer(transactions in prop::collection::vec(arb_transaction(), 1..60)) {
        let table = aggregate(&transactions).unwrap();
        let distinct: BTreeSet<&str> = transactions.iter().map(|t| t.customer_id.as_str()).collect();

        prop_assert_eq!(table.len(), distinct.len());
        let ids: Vec<&str> = table.customers.iter().map(|c| c.customer_id.as_str()).collect();
        prop_assert_eq!(ids, distinct.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn totals_and_counts_match_transactions(transactions in prop::collection::vec(arb_transaction(), 1..60)) {
        let table = aggregate(&transactions).unwrap();

        let mut expected: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
        for t in &transactions {
            let entry = expected.entry(t.customer_id.as_str()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += t.amount;
        }

        for customer in &table.customers {
            let (count, total) = expected[customer.customer_id.as_str()];
            prop_assert!(customer.frequency >= 1);
            prop_assert_eq!(customer.frequency, count);
            // Quarter-unit amounts sum exactly in f64
            prop_assert_eq!(customer.monetary_total, total);
            prop_assert!((customer.monetary_mean - total / count as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn recency_and_std_are_non_negative(transactions in prop::collection::vec(arb_transaction(), 1..60)) {
        let table = aggregate(&transactions).unwrap();
        let global_max = transactions.iter().map(|t| t.start_time).max().unwrap();

        for customer in &table.customers {
            let latest = transactions
                .iter()
                .filter(|t| t.customer_id == customer.customer_id)
                .map(|t| t.start_time)
                .max()
                .unwrap();

            prop_assert!(customer.recency >= 0);
            prop_assert_eq!(customer.recency, (global_max - latest).num_days());
            prop_assert!(customer.monetary_std >= 0.0);
            if customer.frequency == 1 {
                prop_assert_eq!(customer.monetary_std, 0.0);
            }
        }
    }
}
