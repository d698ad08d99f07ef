//! Scan aggregation: folding scanned codes into a counted list.
//!
//! The same merge rules serve the client (one scan at a time into the tracked
//! item list) and the remote service (a batch delta into persisted rows), so
//! both sides are written against the [`Tally`] trait.

use std::collections::HashMap;

use crate::scan_model::{ScanDetails, ScanItem};

/// An entry of a counted list, keyed by its code.
pub trait Tally {
    fn code(&self) -> &str;

    /// Adds `quantity` and overwrites descriptive fields present in `details`.
    fn absorb(&mut self, quantity: u32, details: &ScanDetails);
}

/// Counts one scan of `code` into `list`.
///
/// Increments the existing entry, or appends `insert({code, 1})`. Returns
/// `true` when a new entry was appended. Calling it twice with the same code
/// counts twice.
pub fn merge<T: Tally>(list: &mut Vec<T>, code: &str, insert: impl FnOnce(ScanItem) -> T) -> bool {
    match list.iter_mut().find(|entry| entry.code() == code) {
        Some(existing) => {
            existing.absorb(1, &ScanDetails::default());
            false
        }
        None => {
            list.push(insert(ScanItem::new(code, 1)));
            true
        }
    }
}

/// Collapses a batch to one item per code, in order of first appearance.
///
/// Quantities are summed; for descriptive fields the last present value in
/// input order wins.
pub fn group_by_code(incoming: &[ScanItem]) -> Vec<ScanItem> {
    let mut grouped: Vec<ScanItem> = Vec::with_capacity(incoming.len());
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for item in incoming {
        match positions.get(item.code.as_str()) {
            Some(&position) => grouped[position].absorb(item.quantity, &item.details()),
            None => {
                positions.insert(item.code.as_str(), grouped.len());
                grouped.push(item.clone());
            }
        }
    }
    grouped
}

/// Merges a batch delta into `list` and returns how many entries were added.
///
/// The batch is grouped with [`group_by_code`] first. Existing entries are
/// incremented by the group's quantity and take its present descriptive
/// fields; unknown codes are appended through `insert`, except groups that sum
/// to zero, which carry nothing to count.
pub fn merge_delta<T: Tally>(
    list: &mut Vec<T>,
    incoming: &[ScanItem],
    mut insert: impl FnMut(ScanItem) -> T,
) -> usize {
    let mut inserted = 0;
    for group in group_by_code(incoming) {
        match list.iter_mut().find(|entry| entry.code() == group.code) {
            Some(existing) => existing.absorb(group.quantity, &group.details()),
            None if group.quantity == 0 => {}
            None => {
                list.push(insert(group));
                inserted += 1;
            }
        }
    }
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(code: &str, quantity: u32, name: Option<&str>) -> ScanItem {
        ScanItem {
            product_name: name.map(str::to_string),
            ..ScanItem::new(code, quantity)
        }
    }

    fn quantity_of(list: &[ScanItem], code: &str) -> Option<u32> {
        list.iter().find(|i| i.code == code).map(|i| i.quantity)
    }

    #[test]
    fn merge_is_not_idempotent() {
        let mut list: Vec<ScanItem> = Vec::new();
        assert!(merge(&mut list, "0123456789012", |i| i));
        assert!(!merge(&mut list, "0123456789012", |i| i));
        assert_eq!(list, vec![ScanItem::new("0123456789012", 2)]);
    }

    #[test]
    fn merge_keeps_descriptive_fields() {
        let mut list = vec![item("1", 1, Some("Milk"))];
        merge(&mut list, "1", |i| i);
        assert_eq!(list[0].product_name.as_deref(), Some("Milk"));
        assert_eq!(list[0].quantity, 2);
    }

    #[test]
    fn group_sums_and_last_present_value_wins() {
        let batch = vec![
            item("A", 1, Some("first")),
            item("B", 2, None),
            item("A", 3, None),
            item("A", 1, Some("last")),
        ];
        let grouped = group_by_code(&batch);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].code, "A");
        assert_eq!(grouped[0].quantity, 5);
        assert_eq!(grouped[0].product_name.as_deref(), Some("last"));
        assert_eq!(grouped[1].quantity, 2);
    }

    #[test]
    fn merge_delta_increments_and_overwrites_only_present_fields() {
        let mut list = vec![ScanItem {
            internal_code: Some("INT-1".to_string()),
            ..item("A", 2, Some("old"))
        }];
        let inserted = merge_delta(
            &mut list,
            &[item("A", 3, Some("new")), item("C", 1, None)],
            |i| i,
        );
        assert_eq!(inserted, 1);
        assert_eq!(list[0].quantity, 5);
        assert_eq!(list[0].product_name.as_deref(), Some("new"));
        assert_eq!(list[0].internal_code.as_deref(), Some("INT-1"));
        assert_eq!(quantity_of(&list, "C"), Some(1));
    }

    #[test]
    fn merge_delta_quantities_do_not_depend_on_order() {
        let batch = vec![
            item("A", 1, None),
            item("B", 4, Some("bread")),
            item("A", 2, None),
            item("C", 1, None),
            item("B", 1, None),
            item("A", 5, None),
        ];
        let base = vec![item("B", 10, None), item("D", 1, None)];

        let mut expected = base.clone();
        merge_delta(&mut expected, &batch, |i| i);

        // Every rotation and the reversal of the batch.
        let mut orders: Vec<Vec<ScanItem>> = (0..batch.len())
            .map(|k| {
                let mut rotated = batch.clone();
                rotated.rotate_left(k);
                rotated
            })
            .collect();
        orders.push(batch.iter().rev().cloned().collect());

        for order in orders {
            let mut merged = base.clone();
            merge_delta(&mut merged, &order, |i| i);
            for code in ["A", "B", "C", "D"] {
                assert_eq!(quantity_of(&merged, code), quantity_of(&expected, code), "code {code}");
            }
            let b = merged.iter().find(|i| i.code == "B").unwrap();
            assert_eq!(b.product_name.as_deref(), Some("bread"));
        }
        assert_eq!(quantity_of(&expected, "A"), Some(8));
        assert_eq!(quantity_of(&expected, "B"), Some(15));
    }

    #[test]
    fn merge_delta_skips_zero_quantity_unknown_codes() {
        let mut list = vec![item("A", 1, None)];
        let incoming = [item("A", 0, Some("named")), item("Z", 0, Some("ghost"))];
        let inserted = merge_delta(&mut list, &incoming, |i| i);
        assert_eq!(inserted, 0);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].quantity, 1);
        assert_eq!(list[0].product_name.as_deref(), Some("named"));
    }
}
