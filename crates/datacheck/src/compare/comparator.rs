//! Streaming merge-join over two digest channels.
//!
//! Both channels deliver digests in the same key order. Equal keys are
//! classified immediately; unequal keys are parked in a per-side spill map
//! until the other side catches up or the stream ends. Key ordering is never
//! compared here: the database decides the order, so only equality matters.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{RowDigest, Side};
use crate::error::{CheckError, Result};

/// How a comparison ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOutcome {
    /// Both channels were drained.
    Completed,
    /// The uncertain set reached the capacity bound; both producers were stopped.
    CapacityExceeded,
}

/// Classification state of one table.
#[derive(Debug, Clone)]
pub struct Comparison {
    /// Keys present on both sides with equal checksums.
    pub same_rows: u64,
    /// Keys present on both sides with different checksums, in discovery order.
    pub diff: Vec<String>,
    /// Keys seen only on the source so far.
    pub source_only: HashMap<String, u32>,
    /// Keys seen only on the target so far.
    pub target_only: HashMap<String, u32>,
    pub outcome: CompareOutcome,
}

impl Default for Comparison {
    fn default() -> Self {
        Self {
            same_rows: 0,
            diff: Vec::new(),
            source_only: HashMap::new(),
            target_only: HashMap::new(),
            outcome: CompareOutcome::Completed,
        }
    }
}

impl Comparison {
    /// Number of keys not proven equal.
    pub fn uncertain_count(&self) -> usize {
        self.diff.len() + self.source_only.len() + self.target_only.len()
    }

    /// Every uncertain key: diffs first, then source-only, then target-only.
    pub fn uncertain_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.uncertain_count());
        keys.extend(self.diff.iter().cloned());
        keys.extend(self.source_only.keys().cloned());
        keys.extend(self.target_only.keys().cloned());
        keys
    }

    /// Drop keys that a recheck proved consistent.
    pub fn remove_resolved(&mut self, resolved: &[String]) {
        let resolved: HashSet<&str> = resolved.iter().map(String::as_str).collect();
        self.source_only.retain(|k, _| !resolved.contains(k.as_str()));
        self.target_only.retain(|k, _| !resolved.contains(k.as_str()));
        self.diff.retain(|k| !resolved.contains(k.as_str()));
    }

    pub fn is_truncated(&self) -> bool {
        self.outcome == CompareOutcome::CapacityExceeded
    }
}

/// Control flow after classifying one key.
enum Flow {
    Continue,
    Full,
}

/// Single-consumer merge-join with a bound on uncertain rows.
pub struct Comparator {
    label: String,
    capacity: usize,
    source_stop: CancellationToken,
    target_stop: CancellationToken,
    state: Comparison,
    last_source: Option<String>,
    last_target: Option<String>,
}

impl Comparator {
    /// Create a comparator for one table.
    ///
    /// `source_stop` and `target_stop` are fired when the comparison stops
    /// early so neither producer keeps pushing into an abandoned channel.
    pub fn new(
        label: impl Into<String>,
        capacity: usize,
        source_stop: CancellationToken,
        target_stop: CancellationToken,
    ) -> Self {
        Self {
            label: label.into(),
            capacity,
            source_stop,
            target_stop,
            state: Comparison::default(),
            last_source: None,
            last_target: None,
        }
    }

    /// Drain both channels and classify every key.
    ///
    /// On capacity overflow the remaining input is left unread. A key seen
    /// twice on one side is an error.
    pub async fn run(
        mut self,
        source: &mut mpsc::Receiver<RowDigest>,
        target: &mut mpsc::Receiver<RowDigest>,
    ) -> Result<Comparison> {
        match self.merge(source, target).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Full) => {
                warn!(
                    "[{}] diff capacity {} exceeded, stopping comparison",
                    self.label, self.capacity
                );
                self.stop_producers();
                self.state.outcome = CompareOutcome::CapacityExceeded;
            }
            Err(e) => {
                self.stop_producers();
                return Err(e);
            }
        }

        debug!(
            "[{}] compared: same={} diff={} source_only={} target_only={}",
            self.label,
            self.state.same_rows,
            self.state.diff.len(),
            self.state.source_only.len(),
            self.state.target_only.len()
        );
        Ok(self.state)
    }

    async fn merge(
        &mut self,
        source: &mut mpsc::Receiver<RowDigest>,
        target: &mut mpsc::Receiver<RowDigest>,
    ) -> Result<Flow> {
        let mut s = self.next(source, Side::Source).await?;
        let mut t = self.next(target, Side::Target).await?;

        loop {
            let (Some(sd), Some(td)) = (s.as_ref(), t.as_ref()) else {
                break;
            };
            if sd.key == td.key {
                if let Flow::Full = self.classify(sd.key.clone(), sd.checksum, td.checksum) {
                    return Ok(Flow::Full);
                }
                s = self.next(source, Side::Source).await?;
                t = self.next(target, Side::Target).await?;
            } else if let Some(t_sum) = self.state.target_only.remove(&sd.key) {
                if let Flow::Full = self.classify(sd.key.clone(), sd.checksum, t_sum) {
                    return Ok(Flow::Full);
                }
                s = self.next(source, Side::Source).await?;
            } else if let Some(s_sum) = self.state.source_only.remove(&td.key) {
                if let Flow::Full = self.classify(td.key.clone(), s_sum, td.checksum) {
                    return Ok(Flow::Full);
                }
                t = self.next(target, Side::Target).await?;
            } else {
                let (sd, td) = (sd.clone(), td.clone());
                if let Flow::Full = self.spill(Side::Source, sd)? {
                    return Ok(Flow::Full);
                }
                if let Flow::Full = self.spill(Side::Target, td)? {
                    return Ok(Flow::Full);
                }
                s = self.next(source, Side::Source).await?;
                t = self.next(target, Side::Target).await?;
            }
        }

        // One side is exhausted; the other's current element is still unclassified
        while let Some(sd) = s {
            if let Flow::Full = self.match_or_spill(Side::Source, sd)? {
                return Ok(Flow::Full);
            }
            s = self.next(source, Side::Source).await?;
        }
        while let Some(td) = t {
            if let Flow::Full = self.match_or_spill(Side::Target, td)? {
                return Ok(Flow::Full);
            }
            t = self.next(target, Side::Target).await?;
        }

        Ok(Flow::Continue)
    }

    /// Receive the next digest, rejecting a repeat of the previous key.
    async fn next(
        &mut self,
        rx: &mut mpsc::Receiver<RowDigest>,
        side: Side,
    ) -> Result<Option<RowDigest>> {
        let Some(digest) = rx.recv().await else {
            return Ok(None);
        };
        let last = match side {
            Side::Source => &mut self.last_source,
            Side::Target => &mut self.last_target,
        };
        if last.as_deref() == Some(digest.key.as_str()) {
            return Err(CheckError::DuplicateKey {
                key: digest.key,
                side: side.to_string(),
            });
        }
        *last = Some(digest.key.clone());
        Ok(Some(digest))
    }

    /// Resolve a digest against the other side's spill map, or park it.
    fn match_or_spill(&mut self, side: Side, digest: RowDigest) -> Result<Flow> {
        let other = match side {
            Side::Source => &mut self.state.target_only,
            Side::Target => &mut self.state.source_only,
        };
        match other.remove(&digest.key) {
            Some(other_sum) => {
                let (s_sum, t_sum) = match side {
                    Side::Source => (digest.checksum, other_sum),
                    Side::Target => (other_sum, digest.checksum),
                };
                Ok(self.classify(digest.key, s_sum, t_sum))
            }
            None => self.spill(side, digest),
        }
    }

    /// Record a key present on both sides.
    fn classify(&mut self, key: String, source_sum: u32, target_sum: u32) -> Flow {
        if source_sum == target_sum {
            self.state.same_rows += 1;
            return Flow::Continue;
        }
        self.state.diff.push(key);
        if self.state.diff.len() >= self.capacity {
            Flow::Full
        } else {
            Flow::Continue
        }
    }

    /// Park a key seen on one side only.
    fn spill(&mut self, side: Side, digest: RowDigest) -> Result<Flow> {
        let map = match side {
            Side::Source => &mut self.state.source_only,
            Side::Target => &mut self.state.target_only,
        };
        if map.contains_key(&digest.key) {
            return Err(CheckError::DuplicateKey {
                key: digest.key,
                side: side.to_string(),
            });
        }
        map.insert(digest.key, digest.checksum);
        if map.len() >= self.capacity {
            Ok(Flow::Full)
        } else {
            Ok(Flow::Continue)
        }
    }

    fn stop_producers(&self) {
        self.source_stop.cancel();
        self.target_stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;


    fn digests(rows: &[(u32, u32)]) -> Vec<RowDigest> {
        rows.iter()
            .map(|(k, c)| RowDigest::new(k.to_string(), *c))
            .collect()
    }

    /// Feed a whole side into a channel large enough to never block.
    fn feed(rows: &[(u32, u32)]) -> mpsc::Receiver<RowDigest> {
        let (tx, rx) = mpsc::channel(rows.len().max(1));
        for d in digests(rows) {
            tx.try_send(d).unwrap();
        }
        rx
    }

    async fn compare(
        capacity: usize,
        source: &[(u32, u32)],
        target: &[(u32, u32)],
    ) -> Result<Comparison> {
        let mut s = feed(source);
        let mut t = feed(target);
        Comparator::new(
            "test.t",
            capacity,
            CancellationToken::new(),
            CancellationToken::new(),
        )
        .run(&mut s, &mut t)
        .await
    }

    #[tokio::test]
    async fn test_changed_row_is_diff() {
        let cmp = compare(100, &[(1, 10), (2, 20), (3, 30)], &[(1, 10), (2, 99), (3, 30)])
            .await
            .unwrap();
        assert_eq!(cmp.same_rows, 2);
        assert_eq!(cmp.diff, vec!["2".to_string()]);
        assert!(cmp.source_only.is_empty());
        assert!(cmp.target_only.is_empty());
        assert_eq!(cmp.outcome, CompareOutcome::Completed);
    }

    #[tokio::test]
    async fn test_shifted_keys_spill() {
        let cmp = compare(100, &[(1, 10), (2, 20)], &[(2, 20), (3, 30)])
            .await
            .unwrap();
        assert_eq!(cmp.same_rows, 1);
        assert!(cmp.diff.is_empty());
        assert_eq!(cmp.source_only, HashMap::from([("1".to_string(), 10)]));
        assert_eq!(cmp.target_only, HashMap::from([("3".to_string(), 30)]));
    }

    #[tokio::test]
    async fn test_capacity_stops_before_third_pair() {
        let mut s = feed(&[(1, 1), (2, 2), (3, 3)]);
        let mut t = feed(&[(1, 9), (2, 9), (3, 9)]);
        let source_stop = CancellationToken::new();
        let target_stop = CancellationToken::new();

        let cmp = Comparator::new("test.t", 2, source_stop.clone(), target_stop.clone())
            .run(&mut s, &mut t)
            .await
            .unwrap();

        assert_eq!(cmp.outcome, CompareOutcome::CapacityExceeded);
        assert_eq!(cmp.diff.len(), 2);
        assert!(source_stop.is_cancelled());
        assert!(target_stop.is_cancelled());
        // Third pair never consumed
        assert_eq!(s.try_recv().unwrap().key, "3");
        assert_eq!(t.try_recv().unwrap().key, "3");
    }

    #[tokio::test]
    async fn test_capacity_applies_to_spill_maps() {
        let cmp = compare(2, &[(1, 1), (3, 3), (5, 5)], &[(2, 2), (4, 4), (6, 6)])
            .await
            .unwrap();
        assert!(cmp.is_truncated());
    }

    #[tokio::test]
    async fn test_one_side_empty() {
        let cmp = compare(100, &[(1, 1), (2, 2)], &[]).await.unwrap();
        assert_eq!(cmp.same_rows, 0);
        assert_eq!(cmp.source_only.len(), 2);

        let cmp = compare(100, &[], &[(7, 7)]).await.unwrap();
        assert_eq!(cmp.target_only.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_resolves_against_spill() {
        // Source falls behind: 4 is parked on the target side, then matched while draining
        let cmp = compare(100, &[(1, 1), (2, 2), (4, 4)], &[(1, 1), (4, 5)])
            .await
            .unwrap();
        assert_eq!(cmp.same_rows, 1);
        assert_eq!(cmp.diff, vec!["4".to_string()]);
        assert_eq!(cmp.source_only.len(), 1);
        assert!(cmp.target_only.is_empty());
    }

    #[tokio::test]
    async fn test_partition_is_complete() {
        let source = [(1, 1), (2, 2), (3, 3), (5, 5), (8, 8), (9, 9)];
        let target = [(2, 2), (3, 0), (4, 4), (5, 5), (9, 1), (10, 10)];
        let cmp = compare(100, &source, &target).await.unwrap();

        let all: HashSet<String> = source
            .iter()
            .chain(target.iter())
            .map(|(k, _)| k.to_string())
            .collect();
        let mut seen: HashSet<String> = HashSet::new();
        for key in cmp
            .diff
            .iter()
            .chain(cmp.source_only.keys())
            .chain(cmp.target_only.keys())
        {
            assert!(seen.insert(key.clone()), "key {} classified twice", key);
        }
        assert_eq!(seen.len() as u64 + cmp.same_rows, all.len() as u64);
        assert_eq!(cmp.same_rows, 2);
        assert_eq!(cmp.diff.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let err = compare(100, &[(1, 1), (1, 1)], &[(1, 1)]).await.unwrap_err();
        assert!(matches!(err, CheckError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn test_remove_resolved() {
        let mut cmp = compare(100, &[(1, 1), (2, 2)], &[(2, 3), (5, 5)])
            .await
            .unwrap();
        assert_eq!(cmp.uncertain_count(), 3);
        cmp.remove_resolved(&["2".to_string(), "5".to_string()]);
        assert!(cmp.diff.is_empty());
        assert!(cmp.target_only.is_empty());
        assert_eq!(cmp.uncertain_keys(), vec!["1".to_string()]);
    }
}
