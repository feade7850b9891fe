use std::collections::BTreeMap;
use std::ops::Bound;

use super::MarkType;
use crate::{Interval, SectionId, Timestamp};

/// One `(section, kind, time)` mark as written by `Frame::mark`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Mark {
    pub section: SectionId,
    pub kind: MarkType,
    pub timestamp: Timestamp,
}

/// Per-frame host overrides, keyed by section.
#[derive(Debug, Default, Clone)]
pub(crate) struct FrameOverrides {
    pub queueing_delay: BTreeMap<SectionId, Interval>,
    pub inverse_throughput: BTreeMap<SectionId, Interval>,
}

/// Everything a frame wrote, collected while it is alive.
#[derive(Debug, Default)]
pub(crate) struct FrameMarks {
    pub marks: Vec<Mark>,
    pub overrides: FrameOverrides,
}

/// A released frame's marks, reduced for fold-back.
///
/// Repeated marks widen the section: the earliest `Begin` and the latest
/// `End` win. A section only yields a duration when both ends are present.
#[derive(Debug, Default, Clone)]
pub(crate) struct FrameRecord {
    begins: BTreeMap<SectionId, Timestamp>,
    ends: BTreeMap<SectionId, Timestamp>,
    overrides: FrameOverrides,
}

impl FrameRecord {
    pub(crate) fn new(collected: FrameMarks) -> Self {
        let mut begins = BTreeMap::new();
        let mut ends = BTreeMap::new();

        for mark in collected.marks {
            match mark.kind {
                MarkType::Begin => {
                    begins
                        .entry(mark.section)
                        .and_modify(|t: &mut Timestamp| *t = (*t).min(mark.timestamp))
                        .or_insert(mark.timestamp);
                }
                MarkType::End => {
                    ends.entry(mark.section)
                        .and_modify(|t: &mut Timestamp| *t = (*t).max(mark.timestamp))
                        .or_insert(mark.timestamp);
                }
            }
        }

        Self {
            begins,
            ends,
            overrides: collected.overrides,
        }
    }

    /// Earliest and latest mark of the frame.
    pub(crate) fn span(&self) -> Option<(Timestamp, Timestamp)> {
        let all = || self.begins.values().chain(self.ends.values()).copied();
        Some((all().min()?, all().max()?))
    }

    /// Matched section durations, with this frame's inverse-throughput
    /// overrides substituted for (or added to) the measured ones.
    pub(crate) fn durations(&self) -> BTreeMap<SectionId, Interval> {
        let mut durations: BTreeMap<SectionId, Interval> = self
            .ends
            .iter()
            .filter_map(|(section, end)| {
                let begin = self.begins.get(section)?;
                Some((*section, end.saturating_sub(*begin)))
            })
            .collect();
        durations.extend(self.overrides.inverse_throughput.iter().map(|(s, d)| (*s, *d)));
        durations
    }

    /// Time this frame spent waiting between sections.
    ///
    /// For each section this frame finished, the measured wait is how long the
    /// reference frame still occupied the next section after the hand-off. A
    /// frame-scope override replaces the measurement, and failing that a
    /// context-scope override does.
    pub(crate) fn queueing_delay<F>(&self, reference: &FrameRecord, context_override: F) -> Interval
    where
        F: Fn(SectionId) -> Option<Interval>,
    {
        let mut sections: Vec<SectionId> = self.ends.keys().copied().collect();
        sections.extend(
            self.overrides
                .queueing_delay
                .keys()
                .filter(|s| !self.ends.contains_key(*s)),
        );

        sections
            .into_iter()
            .map(|section| {
                if let Some(delay) = self.overrides.queueing_delay.get(&section) {
                    return *delay;
                }
                if let Some(delay) = context_override(section) {
                    return delay;
                }
                let Some(handoff) = self.ends.get(&section) else {
                    return 0;
                };
                reference
                    .ends
                    .range((Bound::Excluded(section), Bound::Unbounded))
                    .next()
                    .map(|(_, busy_until)| busy_until.saturating_sub(*handoff))
                    .unwrap_or(0)
            })
            .fold(0, Interval::saturating_add)
    }

    /// Reduced marks in `(section, kind, time)` form, begins first.
    pub(crate) fn marks(&self) -> impl Iterator<Item = Mark> + '_ {
        let begins = self.begins.iter().map(|(s, t)| Mark {
            section: *s,
            kind: MarkType::Begin,
            timestamp: *t,
        });
        let ends = self.ends.iter().map(|(s, t)| Mark {
            section: *s,
            kind: MarkType::End,
            timestamp: *t,
        });
        begins.chain(ends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::MarkType::{Begin, End};

    fn record(marks: &[(SectionId, MarkType, Timestamp)]) -> FrameRecord {
        FrameRecord::new(FrameMarks {
            marks: marks
                .iter()
                .map(|&(section, kind, timestamp)| Mark { section, kind, timestamp })
                .collect(),
            overrides: FrameOverrides::default(),
        })
    }

    #[test]
    fn empty_record_has_no_span() {
        let r = record(&[]);
        assert_eq!(r.span(), None);
        assert!(r.durations().is_empty());
    }

    #[test]
    fn matched_pairs_yield_durations() {
        let r = record(&[(1, Begin, 100), (1, End, 150), (2, Begin, 160), (2, End, 200)]);
        let d = r.durations();
        assert_eq!(d.get(&1), Some(&50));
        assert_eq!(d.get(&2), Some(&40));
        assert_eq!(r.span(), Some((100, 200)));
    }

    #[test]
    fn unmatched_marks_are_skipped() {
        let r = record(&[(1, Begin, 100), (2, End, 300), (3, Begin, 10)]);
        assert!(r.durations().is_empty());
        // Still part of the span.
        assert_eq!(r.span(), Some((10, 300)));
    }

    #[test]
    fn repeated_marks_widen_section() {
        let r = record(&[(1, Begin, 120), (1, End, 130), (1, Begin, 100), (1, End, 180)]);
        assert_eq!(r.durations().get(&1), Some(&80));
    }

    #[test]
    fn inverted_pair_saturates() {
        let r = record(&[(1, Begin, 200), (1, End, 100)]);
        assert_eq!(r.durations().get(&1), Some(&0));
    }

    #[test]
    fn inverse_throughput_override_replaces_measurement() {
        let mut r = record(&[(1, Begin, 0), (1, End, 500)]);
        r.overrides.inverse_throughput.insert(1, 20);
        r.overrides.inverse_throughput.insert(9, 7);
        let d = r.durations();
        assert_eq!(d.get(&1), Some(&20));
        assert_eq!(d.get(&9), Some(&7));
    }

    #[test]
    fn queueing_delay_measures_next_section_of_reference() {
        // Reference still ran section 2 until 250 while this frame handed off
        // from section 1 at 200.
        let reference = record(&[(1, Begin, 0), (1, End, 100), (2, Begin, 100), (2, End, 250)]);
        let frame = record(&[(1, Begin, 100), (1, End, 200), (2, Begin, 250), (2, End, 400)]);
        assert_eq!(frame.queueing_delay(&reference, |_| None), 50);
    }

    #[test]
    fn queueing_delay_prefers_overrides() {
        let reference = record(&[(1, End, 100), (2, End, 250)]);
        let mut frame = record(&[(1, End, 200), (2, End, 400)]);
        assert_eq!(frame.queueing_delay(&reference, |s| (s == 1).then_some(7)), 7);

        frame.overrides.queueing_delay.insert(1, 3);
        frame.overrides.queueing_delay.insert(5, 11);
        assert_eq!(frame.queueing_delay(&reference, |s| (s == 1).then_some(7)), 14);
    }

    #[test]
    fn queueing_delay_saturates() {
        let reference = record(&[(1, End, 100), (2, End, 250)]);
        let mut frame = record(&[(1, End, 200), (2, End, 400)]);
        frame.overrides.queueing_delay.insert(1, Interval::MAX / 2 + 1);
        frame.overrides.queueing_delay.insert(2, Interval::MAX / 2 + 1);
        assert_eq!(frame.queueing_delay(&reference, |_| None), Interval::MAX);
    }

    #[test]
    fn marks_round_out_reduced_view() {
        let r = record(&[(1, End, 20), (1, Begin, 10)]);
        let marks: Vec<_> = r.marks().map(|m| (m.section, m.kind, m.timestamp)).collect();
        assert_eq!(marks, vec![(1, Begin, 10), (1, End, 20)]);
    }
}
