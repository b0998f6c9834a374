//! Admission and termination decisions for a shard's poll loop
//!
//! Nothing in here performs I/O. The scrape engine hands every page to
//! [`PollPolicy::admit_page`], persists the returned prefix and stops the
//! shard once [`Admission::should_break`] is set.

use std::cmp::Ordering;

use crate::config::{EndingPosition, ScrapeConfig};
use crate::error::{Result, SlrError};
use crate::record::StreamRecord;

/// Mutable counters threaded through one shard's poll loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardIterationState {
    pub total_found_records: u64,
    pub consecutive_empty_polls: u32,
    pub loop_count: u64,
    pub iterator: Option<String>,
    pub should_break: bool,
}

impl ShardIterationState {
    pub fn new(iterator: impl Into<String>) -> Self {
        Self {
            iterator: Some(iterator.into()),
            ..Default::default()
        }
    }
}

/// Why a shard's loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The per-shard record cap was reached
    CapReached,
    /// A sequence-number, timestamp or LATEST bound was reached
    BoundReached,
    /// Too many consecutive empty pages
    EmptyPolls,
    /// The shard returned no next iterator
    EndOfShard,
}

/// Outcome of one policy decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Length of the page prefix that may be persisted
    pub admitted: usize,
    pub should_break: bool,
    pub reason: Option<StopReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundKind {
    Before,
    At,
    After,
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    ending_position: EndingPosition,
    max_empty_polls: u32,
}

impl PollPolicy {
    pub fn new(config: &ScrapeConfig) -> Self {
        Self {
            ending_position: config.ending_position().clone(),
            max_empty_polls: config.max_empty_polls(),
        }
    }

    pub fn with_ending(ending_position: EndingPosition, max_empty_polls: u32) -> Self {
        Self {
            ending_position,
            max_empty_polls,
        }
    }

    fn cap(&self) -> Option<u64> {
        match self.ending_position {
            EndingPosition::TotalRecordsPerShard(cap) => Some(cap),
            _ => None,
        }
    }

    /// Count arithmetic for a page of `returned` records
    pub fn admit(&self, state: &mut ShardIterationState, returned: usize) -> Result<Admission> {
        let cap = self.cap();
        if let Some(cap) = cap {
            if state.total_found_records > cap {
                return Err(SlrError::Internal(format!(
                    "Calculation fault: total_found_records ({}) exceeds \
                     total_records_per_shard ({}) after {} polls",
                    state.total_found_records, cap, state.loop_count
                )));
            }
        }

        let (admitted, should_break, reason) = if returned > 0 {
            state.consecutive_empty_polls = 0;
            let admitted = match cap {
                Some(cap) => (returned as u64).min(cap - state.total_found_records),
                None => returned as u64,
            };
            let reached = cap.is_some_and(|cap| state.total_found_records + admitted >= cap);
            (admitted, reached, reached.then_some(StopReason::CapReached))
        } else {
            state.consecutive_empty_polls += 1;
            let exhausted =
                state.consecutive_empty_polls > self.max_empty_polls.saturating_sub(1);
            (0, exhausted, exhausted.then_some(StopReason::EmptyPolls))
        };

        state.total_found_records += admitted;
        state.loop_count += 1;
        state.should_break = should_break;

        Ok(Admission {
            admitted: admitted as usize,
            should_break,
            reason,
        })
    }

    /// Apply the ending bound to a fetched page, then the count arithmetic
    pub fn admit_page(
        &self,
        state: &mut ShardIterationState,
        records: &[StreamRecord],
        millis_behind_latest: Option<i64>,
    ) -> Result<Admission> {
        let (bounded, bound_reached) = self.bounded_prefix(records);

        if bound_reached && bounded == 0 {
            // The page held records, just none inside the bound
            state.consecutive_empty_polls = 0;
            state.loop_count += 1;
            state.should_break = true;
            return Ok(Admission {
                admitted: 0,
                should_break: true,
                reason: Some(StopReason::BoundReached),
            });
        }

        let mut admission = self.admit(state, bounded)?;
        let caught_up = matches!(self.ending_position, EndingPosition::Latest)
            && millis_behind_latest == Some(0);

        if !admission.should_break && (bound_reached || caught_up) {
            admission.should_break = true;
            admission.reason = Some(StopReason::BoundReached);
            state.should_break = true;
        }
        Ok(admission)
    }

    /// Length of the page prefix inside the ending bound, and whether the bound was hit
    fn bounded_prefix(&self, records: &[StreamRecord]) -> (usize, bool) {
        match &self.ending_position {
            EndingPosition::BeforeSequenceNumber(seq) => prefix_by(records, BoundKind::Before, |r| {
                compare_sequence_numbers(r.sequence_number(), seq)
            }),
            EndingPosition::AtSequenceNumber(seq) => prefix_by(records, BoundKind::At, |r| {
                compare_sequence_numbers(r.sequence_number(), seq)
            }),
            EndingPosition::AfterSequenceNumber(seq) => prefix_by(records, BoundKind::After, |r| {
                compare_sequence_numbers(r.sequence_number(), seq)
            }),
            EndingPosition::BeforeTimestamp(ts) => {
                prefix_by(records, BoundKind::Before, |r| r.arrival_timestamp().cmp(ts))
            }
            EndingPosition::AtTimestamp(ts) => {
                prefix_by(records, BoundKind::At, |r| r.arrival_timestamp().cmp(ts))
            }
            EndingPosition::AfterTimestamp(ts) => {
                prefix_by(records, BoundKind::After, |r| r.arrival_timestamp().cmp(ts))
            }
            EndingPosition::TotalRecordsPerShard(_) | EndingPosition::Latest => {
                (records.len(), false)
            }
        }
    }
}

fn prefix_by<F>(records: &[StreamRecord], kind: BoundKind, against_bound: F) -> (usize, bool)
where
    F: Fn(&StreamRecord) -> Ordering,
{
    for (index, record) in records.iter().enumerate() {
        let ordering = against_bound(record);
        match kind {
            BoundKind::Before if ordering != Ordering::Less => return (index, true),
            BoundKind::At if ordering == Ordering::Equal => return (index + 1, true),
            BoundKind::At if ordering == Ordering::Greater => return (index, true),
            BoundKind::After if ordering == Ordering::Greater => return (index + 1, true),
            _ => {}
        }
    }
    (records.len(), false)
}

/// Compare decimal sequence numbers by numeric value
pub fn compare_sequence_numbers(left: &str, right: &str) -> Ordering {
    let left = left.trim_start_matches('0');
    let right = right.trim_start_matches('0');
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn capped(cap: u64, max_empty_polls: u32) -> PollPolicy {
        PollPolicy::with_ending(EndingPosition::TotalRecordsPerShard(cap), max_empty_polls)
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn page(sequences: &[u64]) -> Vec<StreamRecord> {
        sequences
            .iter()
            .map(|seq| {
                StreamRecord::new(
                    seq.to_string(),
                    base_time() + Duration::seconds(*seq as i64),
                    format!("data-{}", seq).into_bytes(),
                    "pk",
                )
                .unwrap()
            })
            .collect()
    }

    /// Feed page sizes until the policy breaks, returning admitted counts of non-empty admissions
    fn run_pages(policy: &PollPolicy, pages: &[usize]) -> (Vec<usize>, ShardIterationState) {
        let mut state = ShardIterationState::new("it");
        let mut admitted = Vec::new();
        for returned in pages {
            let admission = policy.admit(&mut state, *returned).unwrap();
            if admission.admitted > 0 {
                admitted.push(admission.admitted);
            }
            if admission.should_break {
                break;
            }
        }
        (admitted, state)
    }

    #[test]
    fn test_cap_bounded_stop() {
        let (admitted, state) = run_pages(&capped(38, 10), &[3, 10, 25, 0, 10]);
        assert_eq!(admitted, vec![3, 10, 25]);
        assert_eq!(state.total_found_records, 38);
        assert_eq!(state.loop_count, 3);
        assert!(state.should_break);
    }

    #[test]
    fn test_empty_poll_stop() {
        let policy = capped(100, 5);
        let mut state = ShardIterationState::new("it");
        for call in 1..=5 {
            let admission = policy.admit(&mut state, 0).unwrap();
            assert_eq!(admission.admitted, 0);
            assert_eq!(admission.should_break, call == 5, "call {}", call);
        }
        assert_eq!(state.consecutive_empty_polls, 5);
        assert_eq!(state.total_found_records, 0);
    }

    #[test]
    fn test_partial_admission_mid_page() {
        let (admitted, state) = run_pages(&capped(25, 10), &[10, 0, 10, 15, 5, 10]);
        assert_eq!(admitted, vec![10, 10, 5]);
        assert_eq!(state.total_found_records, 25);
        assert_eq!(state.loop_count, 4);
    }

    #[test]
    fn test_non_empty_page_resets_empty_counter() {
        let policy = capped(100, 3);
        let mut state = ShardIterationState::new("it");
        policy.admit(&mut state, 0).unwrap();
        policy.admit(&mut state, 0).unwrap();
        policy.admit(&mut state, 4).unwrap();
        assert_eq!(state.consecutive_empty_polls, 0);
        assert!(!policy.admit(&mut state, 0).unwrap().should_break);
        assert!(!policy.admit(&mut state, 0).unwrap().should_break);
        let admission = policy.admit(&mut state, 0).unwrap();
        assert!(admission.should_break);
        assert_eq!(admission.reason, Some(StopReason::EmptyPolls));
    }

    #[test]
    fn test_admission_conservation() {
        let sequences: Vec<Vec<usize>> = vec![
            vec![1, 2, 3, 4, 5],
            vec![500, 500, 500],
            vec![0, 7, 0, 0, 9, 13, 0, 2],
            vec![99],
            vec![0, 0, 0],
            vec![12, 12, 12, 12, 12, 12],
        ];
        for pages in sequences {
            let total: usize = pages.iter().sum();
            for cap in [1u64, 5, 12, 37, 100, 2000] {
                let policy = capped(cap, 1000);
                let mut state = ShardIterationState::new("it");
                let mut admitted_sum = 0u64;
                let mut previous_total = 0u64;
                for returned in &pages {
                    let admission = policy.admit(&mut state, *returned).unwrap();
                    assert!(admission.admitted <= *returned);
                    assert!(state.total_found_records >= previous_total);
                    previous_total = state.total_found_records;
                    admitted_sum += admission.admitted as u64;
                    if admission.should_break {
                        assert!(state.total_found_records >= cap);
                        break;
                    }
                }
                assert_eq!(admitted_sum, (total as u64).min(cap), "pages {:?} cap {}", pages, cap);
            }
        }
    }

    #[test]
    fn test_uncapped_admits_whole_pages() {
        let policy = PollPolicy::with_ending(EndingPosition::Latest, 2);
        let mut state = ShardIterationState::new("it");
        let admission = policy.admit(&mut state, 250).unwrap();
        assert_eq!(admission.admitted, 250);
        assert!(!admission.should_break);
        assert!(!policy.admit(&mut state, 0).unwrap().should_break);
        assert!(policy.admit(&mut state, 0).unwrap().should_break);
    }

    #[test]
    fn test_counter_overshoot_is_internal_error() {
        let policy = capped(10, 5);
        let mut state = ShardIterationState {
            total_found_records: 11,
            ..ShardIterationState::new("it")
        };
        assert!(matches!(policy.admit(&mut state, 1), Err(SlrError::Internal(_))));
    }

    #[test]
    fn test_sequence_number_bounds() {
        let records = page(&[8, 9, 10, 11, 12]);

        let policy =
            PollPolicy::with_ending(EndingPosition::BeforeSequenceNumber("10".to_string()), 5);
        let mut state = ShardIterationState::new("it");
        let admission = policy.admit_page(&mut state, &records, None).unwrap();
        assert_eq!(admission.admitted, 2);
        assert_eq!(admission.reason, Some(StopReason::BoundReached));

        let policy = PollPolicy::with_ending(EndingPosition::AtSequenceNumber("10".to_string()), 5);
        let mut state = ShardIterationState::new("it");
        assert_eq!(policy.admit_page(&mut state, &records, None).unwrap().admitted, 3);

        let policy =
            PollPolicy::with_ending(EndingPosition::AfterSequenceNumber("10".to_string()), 5);
        let mut state = ShardIterationState::new("it");
        let admission = policy.admit_page(&mut state, &records, None).unwrap();
        assert_eq!(admission.admitted, 4);
        assert!(admission.should_break);
        assert_eq!(state.total_found_records, 4);
    }

    #[test]
    fn test_bound_not_reached_keeps_polling() {
        let policy =
            PollPolicy::with_ending(EndingPosition::AtSequenceNumber("100".to_string()), 5);
        let mut state = ShardIterationState::new("it");
        let admission = policy.admit_page(&mut state, &page(&[1, 2, 3]), None).unwrap();
        assert_eq!(admission.admitted, 3);
        assert!(!admission.should_break);
        assert_eq!(admission.reason, None);
    }

    #[test]
    fn test_bound_before_first_record() {
        let policy =
            PollPolicy::with_ending(EndingPosition::BeforeSequenceNumber("5".to_string()), 5);
        let mut state = ShardIterationState {
            consecutive_empty_polls: 3,
            ..ShardIterationState::new("it")
        };
        let admission = policy.admit_page(&mut state, &page(&[7, 8]), None).unwrap();
        assert_eq!(admission.admitted, 0);
        assert!(admission.should_break);
        assert_eq!(state.consecutive_empty_polls, 0);
        assert_eq!(state.loop_count, 1);
    }

    #[test]
    fn test_timestamp_bounds() {
        let records = page(&[1, 2, 3, 4]);
        let bound = base_time() + Duration::seconds(3);

        let cases = vec![
            (EndingPosition::BeforeTimestamp(bound), 2),
            (EndingPosition::AtTimestamp(bound), 3),
            (EndingPosition::AfterTimestamp(bound), 4),
        ];
        for (ending, expected) in cases {
            let policy = PollPolicy::with_ending(ending.clone(), 5);
            let mut state = ShardIterationState::new("it");
            let admission = policy.admit_page(&mut state, &records, None).unwrap();
            assert_eq!(admission.admitted, expected, "{:?}", ending);
        }

        // AFTER bound not yet crossed: the whole page is admitted and polling continues
        let policy = PollPolicy::with_ending(EndingPosition::AfterTimestamp(bound), 5);
        let mut state = ShardIterationState::new("it");
        let admission = policy.admit_page(&mut state, &page(&[1, 2, 3]), None).unwrap();
        assert_eq!(admission.admitted, 3);
        assert!(!admission.should_break);
    }

    #[test]
    fn test_latest_stops_when_caught_up() {
        let policy = PollPolicy::with_ending(EndingPosition::Latest, 5);
        let mut state = ShardIterationState::new("it");

        let admission = policy.admit_page(&mut state, &page(&[1, 2]), Some(4000)).unwrap();
        assert!(!admission.should_break);

        let admission = policy.admit_page(&mut state, &page(&[3]), Some(0)).unwrap();
        assert_eq!(admission.admitted, 1);
        assert!(admission.should_break);
        assert_eq!(admission.reason, Some(StopReason::BoundReached));
        assert_eq!(state.total_found_records, 3);
    }

    #[test]
    fn test_cap_wins_over_page_length() {
        let policy = capped(2, 5);
        let mut state = ShardIterationState::new("it");
        let admission = policy.admit_page(&mut state, &page(&[1, 2, 3]), None).unwrap();
        assert_eq!(admission.admitted, 2);
        assert_eq!(admission.reason, Some(StopReason::CapReached));
    }

    #[test]
    fn test_compare_sequence_numbers() {
        assert_eq!(compare_sequence_numbers("9", "10"), Ordering::Less);
        assert_eq!(compare_sequence_numbers("100", "99"), Ordering::Greater);
        assert_eq!(compare_sequence_numbers("0042", "42"), Ordering::Equal);
        assert_eq!(
            compare_sequence_numbers(
                "49634871856207391309887373936488347325069951854572470306",
                "49634871856207391309887373936488347325069951854572470307"
            ),
            Ordering::Less
        );
    }
}
