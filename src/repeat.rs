//! Repeat/Loop Engine (spec.md §4.8): `REPT N[,iter]` ... `ENDR`/`ENDU`/`--^`.
//!
//! Body recording and the terminator scan live with each dialect's
//! directive dispatcher (the terminator set differs per dialect); this
//! module turns a recorded body plus a count into the replay frames the
//! [`crate::source::SourceStack`] understands, and names the reserved
//! counter symbol.

use crate::source::repeat_frames;
use crate::source::SourceFrame;

/// The dialect's reserved loop-counter symbol name (spec.md §4.1:
/// "the dialect's `__RPTCNT`/`REPTN` name").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterName {
    /// EDTASM-family `__RPTCNT`.
    RptCnt,
    /// Merlin/SCASM `REPTN` (an optional named iterator symbol is bound
    /// to the same value alongside it).
    Reptn,
}

impl CounterName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterName::RptCnt => "__RPTCNT",
            CounterName::Reptn => "REPTN",
        }
    }
}

/// A parsed `REPT` header: the repeat count and an optional named
/// iterator symbol bound to the same value inside the body.
#[derive(Debug, Clone)]
pub struct RepeatSpec {
    pub count: i64,
    pub iter_name: Option<String>,
}

/// Builds the replay frames for a recorded repeat body. Zero or
/// negative `count` yields no frames (the body is not replayed).
pub fn build_replay(id_base: u32, body: Vec<String>, spec: &RepeatSpec) -> Vec<SourceFrame> {
    repeat_frames(id_base, body, spec.count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_count_yields_no_frames() {
        let spec = RepeatSpec { count: 0, iter_name: None };
        assert!(build_replay(0, vec!["DB 1".into()], &spec).is_empty());
    }

    #[test]
    fn negative_count_yields_no_frames() {
        let spec = RepeatSpec {
            count: -5,
            iter_name: Some("I".into()),
        };
        assert!(build_replay(0, vec!["DB 1".into()], &spec).is_empty());
    }

    #[test]
    fn positive_count_yields_n_frames_with_increasing_iteration() {
        let spec = RepeatSpec { count: 3, iter_name: None };
        let frames = build_replay(0, vec!["DB i".into()], &spec);
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn counter_names_match_dialect_convention() {
        assert_eq!(CounterName::RptCnt.as_str(), "__RPTCNT");
        assert_eq!(CounterName::Reptn.as_str(), "REPTN");
    }
}
