//! Property tests for the flip store against a naive full scan

#[cfg(test)]
mod tests {
    use flipstore::store::{FlipStore, Stats, WEEK_SECS};
    use flipstore::types::{AccountFilter, FlipRecord, RawFlip};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;
    use uuid::Uuid;

    const NOW: i64 = 1_760_000_000;
    const SIX_MONTHS: i64 = 183 * 24 * 60 * 60;

    const DISPLAY_NAMES: [(&str, i32); 3] = [("Acc 1", 0), ("Acc 2", 1), ("Acc 3", 2)];

    // ============================================================================
    // Helpers
    // ============================================================================

    fn random_flip(rng: &mut StdRng, account_ids: &[i32], start: i64, end: i64) -> FlipRecord {
        let closed_time = rng.gen_range(start..=end);
        let opened_quantity = rng.gen_range(1..=1_000);
        let spent = rng.gen_range(100..=1_000_000_000);
        let profit = rng.gen_range(-2_000_000..=4_000_000);
        let item_id = rng.gen_range(1..=20_000);
        RawFlip {
            id: Uuid::from_u128(rng.gen()),
            account_id: account_ids[rng.gen_range(0..account_ids.len())],
            item_id,
            item_name: format!("Test Item {}", item_id),
            opened_time: closed_time - rng.gen_range(60..=3_600),
            closed_time,
            opened_quantity,
            closed_quantity: opened_quantity,
            amount_spent: spent,
            amount_received_after_tax: spent + profit,
            profit,
            tax_paid: rng.gen_range(0..=100_000),
        }
        .try_into()
        .unwrap()
    }

    fn generate(seed: u64, count: usize, account_ids: &[i32]) -> Vec<FlipRecord> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| random_flip(&mut rng, account_ids, NOW - SIX_MONTHS, NOW))
            .collect()
    }

    /// Store populated account by account so every display name is bound
    fn populate(flips: &[FlipRecord]) -> FlipStore {
        let store = FlipStore::new();
        for (name, account_id) in DISPLAY_NAMES {
            let batch: Vec<FlipRecord> = flips
                .iter()
                .filter(|f| f.account_id() == account_id)
                .cloned()
                .collect();
            store.merge(batch, Some(name));
        }
        store
    }

    fn account_of(filter: &AccountFilter) -> Option<i32> {
        match filter {
            AccountFilter::All => None,
            AccountFilter::Account(id) => Some(*id),
            AccountFilter::DisplayName(name) => DISPLAY_NAMES
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id)
                .or(Some(-1)),
        }
    }

    /// Full history for a filter, newest first
    fn expected_flips(flips: &[FlipRecord], filter: &AccountFilter, time: i64) -> Vec<FlipRecord> {
        let account = account_of(filter);
        let mut matching: Vec<FlipRecord> = flips
            .iter()
            .filter(|f| f.closed_time() > time && account.map_or(true, |a| a == f.account_id()))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        matching
    }

    fn expected_stats(flips: &[FlipRecord], filter: &AccountFilter, time: i64) -> Stats {
        let account = account_of(filter);
        flips
            .iter()
            .filter(|f| f.closed_time() > time && account.map_or(true, |a| a == f.account_id()))
            .collect()
    }

    fn filters() -> Vec<AccountFilter> {
        let mut filters = vec![AccountFilter::All];
        for (name, id) in DISPLAY_NAMES {
            filters.push(AccountFilter::DisplayName(name.to_string()));
            filters.push(AccountFilter::Account(id));
        }
        filters.push(AccountFilter::DisplayName("Nobody".to_string()));
        filters
    }

    fn cutoffs(seed: u64, n: usize, flips: &[FlipRecord]) -> Vec<i64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut times = vec![0, NOW - SIX_MONTHS - 1, NOW];
        times.extend((0..n).map(|_| rng.gen_range(NOW - SIX_MONTHS..=NOW)));
        // Exact close times and window edges exercise the tie handling
        times.extend(flips.iter().take(5).map(|f| f.closed_time()));
        times.push(NOW - NOW.rem_euclid(WEEK_SECS));
        times
    }

    // ============================================================================
    // Additivity
    // ============================================================================

    #[test]
    fn test_stats_match_full_scan_on_large_history() {
        let flips = generate(7, 100_000, &[0, 1, 2]);
        let store = populate(&flips);
        assert_eq!(store.record_count(), 100_000);
        assert!(store.verify().is_ok());

        for filter in filters() {
            for time in cutoffs(11, 30, &flips) {
                let expected = expected_stats(&flips, &filter, time);
                assert_eq!(store.calculate_stats(&filter, time), expected);
                store.set_filter(filter.clone(), time);
                assert_eq!(store.get_stats(), expected, "filter {} time {}", filter, time);
            }
        }
    }

    #[test]
    fn test_large_history_pages_match_slices() {
        let flips = generate(13, 100_000, &[0, 1, 2]);
        let store = populate(&flips);

        for filter in [AccountFilter::All, AccountFilter::Account(1)] {
            for time in cutoffs(17, 3, &flips) {
                store.set_filter(filter.clone(), time);
                let expected = expected_flips(&flips, &filter, time);
                for (page, size) in [(1, 100), (2, 100), (37, 33), (500, 50)] {
                    let begin = ((page - 1) * size).min(expected.len());
                    let end = (page * size).min(expected.len());
                    assert_eq!(
                        store.get_page(page, size),
                        expected[begin..end].to_vec(),
                        "filter {} time {} page {} size {}",
                        filter,
                        time,
                        page,
                        size
                    );
                }
            }
        }
    }

    // ============================================================================
    // Pagination completeness
    // ============================================================================

    #[test]
    fn test_pages_reconstruct_full_history() {
        let flips = generate(21, 1_500, &[0, 1, 2]);
        let store = populate(&flips);

        for filter in filters() {
            for time in cutoffs(23, 2, &flips) {
                store.set_filter(filter.clone(), time);
                let expected = expected_flips(&flips, &filter, time);
                assert_eq!(store.get_stats().flip_count as usize, expected.len());

                for size in [1, 3, 20, 33, 50, 100] {
                    let mut collected = Vec::with_capacity(expected.len());
                    let mut page = 1;
                    loop {
                        let chunk = store.get_page(page, size);
                        assert!(chunk.len() <= size);
                        if chunk.is_empty() {
                            break;
                        }
                        collected.extend(chunk);
                        page += 1;
                    }
                    assert_eq!(collected, expected, "filter {} time {} size {}", filter, time, size);
                }
            }
        }
    }

    // ============================================================================
    // Relocation and ordering
    // ============================================================================

    #[test]
    fn test_partial_fills_relocate() {
        let store = FlipStore::new();
        store.set_filter(AccountFilter::All, 0);
        let id = Uuid::new_v4();
        let base = RawFlip {
            id,
            account_id: 0,
            item_id: 1515,
            item_name: "Yew logs".to_string(),
            opened_time: 50,
            closed_time: 100,
            opened_quantity: 10,
            closed_quantity: 5,
            amount_spent: 3_000,
            amount_received_after_tax: 1_700,
            profit: 200,
            tax_paid: 30,
        };
        store.merge(vec![base.clone().try_into().unwrap()], Some("Woodcutter"));

        let closed_time = 2 * WEEK_SECS + 200;
        let full: FlipRecord = RawFlip {
            closed_time,
            closed_quantity: 10,
            amount_received_after_tax: 3_400,
            profit: 400,
            tax_paid: 60,
            ..base
        }
        .try_into()
        .unwrap();
        store.merge(vec![full.clone()], Some("Woodcutter"));

        assert_eq!(store.record_count(), 1);
        assert_eq!(store.get_page(1, 10), vec![full.clone()]);
        assert_eq!(
            store.get_stats(),
            Stats {
                flip_count: 1,
                gross_turnover: 3_000,
                net_profit: 400,
                tax_paid: 60,
            }
        );

        // Only the window containing the final close time holds it
        store.set_filter(AccountFilter::All, closed_time - closed_time.rem_euclid(WEEK_SECS) - 1);
        assert_eq!(store.get_stats().flip_count, 1);
        store.set_filter(AccountFilter::All, closed_time);
        assert_eq!(store.get_stats().flip_count, 0);
        assert!(store.verify().is_ok());
    }

    #[test]
    fn test_out_of_order_redelivery_with_filter_active() {
        let mut rng = StdRng::seed_from_u64(99);
        let flips = generate(31, 4_000, &[0, 1, 2]);
        let store = FlipStore::new();
        store.set_filter(AccountFilter::Account(2), NOW - SIX_MONTHS / 2);

        // Deliver in shuffled batches, then redeliver a third of them with
        // later close times as if further fills had arrived
        let mut shuffled = flips.clone();
        shuffled.shuffle(&mut rng);
        for batch in shuffled.chunks(257) {
            store.merge(batch.to_vec(), None);
        }

        let mut latest: HashMap<Uuid, FlipRecord> =
            flips.iter().map(|f| (f.id(), f.clone())).collect();
        let moved: Vec<FlipRecord> = flips
            .iter()
            .step_by(3)
            .map(|f| {
                let mut raw = RawFlip::from(f);
                raw.closed_time += rng.gen_range(1..=3 * WEEK_SECS);
                raw.profit += 1;
                raw.try_into().unwrap()
            })
            .collect();
        for flip in &moved {
            latest.insert(flip.id(), flip.clone());
        }
        store.merge(moved, None);

        let current: Vec<FlipRecord> = latest.into_values().collect();
        let filter = AccountFilter::Account(2);
        let time = NOW - SIX_MONTHS / 2;
        assert_eq!(store.record_count(), current.len());
        assert_eq!(store.get_stats(), expected_stats(&current, &filter, time));
        assert_eq!(
            store.get_page(1, current.len()),
            expected_flips(&current, &filter, time)
        );
        assert!(store.verify().is_ok());
    }

    #[test]
    fn test_reset_then_reload() {
        let flips = generate(41, 1_000, &[0, 1, 2]);
        let store = populate(&flips);
        store.reset();

        assert_eq!(store.get_stats(), Stats::new());
        assert!(store.get_known_display_names().is_empty());
        assert!(store.get_page(1, 10).is_empty());

        let store = populate(&flips);
        store.set_filter(AccountFilter::All, 0);
        assert_eq!(store.get_stats(), expected_stats(&flips, &AccountFilter::All, 0));
        assert_eq!(
            store.get_known_display_names(),
            vec!["Acc 1", "Acc 2", "Acc 3"]
        );
    }
}
