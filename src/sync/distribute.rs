//! Round-robin article allocation across feeds.
//!
//! One item is drawn per feed per rotation so a prolific feed cannot crowd
//! the others out of a sync pass. Feeds keep their first-seen order; a feed
//! that runs out of items is skipped without consuming a slot.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Allocate up to `global_cap` items, at most `per_source_cap` per source,
/// drawing one item per source in rotation. Input order is preserved within
/// each source.
pub fn round_robin<T, K, F>(items: Vec<T>, key: F, global_cap: usize, per_source_cap: usize) -> Vec<T>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    if global_cap == 0 || per_source_cap == 0 {
        return Vec::new();
    }

    let mut order: Vec<K> = Vec::new();
    let mut queues: HashMap<K, VecDeque<T>> = HashMap::new();
    for item in items {
        let k = key(&item);
        queues
            .entry(k.clone())
            .or_insert_with(|| {
                order.push(k.clone());
                VecDeque::new()
            })
            .push_back(item);
    }

    let mut taken: HashMap<K, usize> = HashMap::new();
    let mut out = Vec::new();
    loop {
        let mut drew = false;
        for k in &order {
            let count = taken.get(k).copied().unwrap_or(0);
            if count >= per_source_cap {
                continue;
            }
            let queue = queues.get_mut(k).expect("queue exists for ordered key");
            if let Some(item) = queue.pop_front() {
                out.push(item);
                *taken.entry(k.clone()).or_insert(0) += 1;
                drew = true;
                if out.len() >= global_cap {
                    return out;
                }
            }
        }
        if !drew {
            return out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(counts: &[(&str, usize)]) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        for (feed, count) in counts {
            for i in 0..*count {
                out.push((feed.to_string(), i));
            }
        }
        out
    }

    #[test]
    fn every_feed_gets_one_before_any_gets_two() {
        let pool = items(&[("a", 50), ("b", 2), ("c", 30)]);
        let picked = round_robin(pool, |(f, _)| f.clone(), 20, 10);

        assert_eq!(picked.len(), 20);
        let from_b = picked.iter().filter(|(f, _)| f == "b").count();
        assert_eq!(from_b, 2, "feed b contributes everything it has");

        // The first rotation touches each feed once.
        let first_three: Vec<&str> = picked[..3].iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(first_three, vec!["a", "b", "c"]);
    }

    #[test]
    fn exhausted_feed_is_skipped_without_consuming_a_slot() {
        let pool = items(&[("a", 1), ("b", 5)]);
        let picked = round_robin(pool, |(f, _)| f.clone(), 4, 10);
        assert_eq!(picked.len(), 4);
        assert_eq!(picked.iter().filter(|(f, _)| f == "b").count(), 3);
    }

    #[test]
    fn per_feed_cap_is_respected() {
        let pool = items(&[("a", 30)]);
        let picked = round_robin(pool, |(f, _)| f.clone(), 100, 10);
        assert_eq!(picked.len(), 10);
    }

    #[test]
    fn global_cap_wins_over_per_feed_cap() {
        let pool = items(&[("a", 30), ("b", 30)]);
        let picked = round_robin(pool, |(f, _)| f.clone(), 5, 10);
        assert_eq!(picked.len(), 5);
    }

    #[test]
    fn order_within_a_feed_is_preserved() {
        let pool = items(&[("a", 3), ("b", 3)]);
        let picked = round_robin(pool, |(f, _)| f.clone(), 6, 10);
        let a_seq: Vec<usize> = picked.iter().filter(|(f, _)| f == "a").map(|(_, i)| *i).collect();
        assert_eq!(a_seq, vec![0, 1, 2]);
    }

    #[test]
    fn zero_caps_yield_nothing() {
        let pool = items(&[("a", 3)]);
        assert!(round_robin(pool.clone(), |(f, _)| f.clone(), 0, 10).is_empty());
        assert!(round_robin(pool, |(f, _)| f.clone(), 10, 0).is_empty());
    }
}
