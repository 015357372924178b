//! Error and Status Codes
//!
//! Two orthogonal taxonomies steer the engine:
//!
//! - [`Status`]: control-flow codes returned by engines and stages. `Ok`,
//!   `Retry` and `NotReady` are not errors; they drive the pipeline state
//!   machine.
//! - [`Fault`]: fatal conditions. A fault stops the owning pipeline cleanly
//!   and is reported to its observers.
//!
//! Every code maps onto a stable `i32` so task fan-outs can fold a set of
//! worker results into the single worst one: `Ok` = 0, `Retry` = 1,
//! `NotReady` = 2 and faults are negative. "Worst" is simply the numeric
//! minimum.

use thiserror::Error;

/// Fatal error conditions.
///
/// Faults are terminal for the pipeline pass that produced them: the worker
/// signals its observers with the fault and exits.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The request cannot be honoured in the current state.
    #[error("invalid request")]
    InvalidRequest,

    /// A provided value is not acceptable.
    #[error("invalid value")]
    InvalidValue,

    /// A provided value falls outside the allowed range.
    #[error("invalid range")]
    InvalidRange,

    /// A value of the wrong type was supplied.
    #[error("type mismatch")]
    TypeMismatch,

    /// The named entity does not exist.
    #[error("not existing")]
    NotExisting,

    /// The requested conversion or operation is not supported.
    #[error("unsupported operation")]
    Unsupported,

    /// The operation is not defined for this component.
    #[error("undefined operation")]
    Undefined,

    /// An unidentified failure.
    #[error("unknown error")]
    Unknown,
}

impl Fault {
    /// Stable numeric code (always negative).
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidRequest => -1,
            Self::InvalidValue => -2,
            Self::InvalidRange => -3,
            Self::TypeMismatch => -4,
            Self::NotExisting => -5,
            Self::Unsupported => -6,
            Self::Undefined => -7,
            Self::Unknown => -8,
        }
    }
}

/// Control-flow result of a prepare/process step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Success; the pass continues.
    #[default]
    Ok,
    /// Re-run the pass immediately.
    Retry,
    /// The pass cannot proceed; suspend until `running` is toggled again.
    NotReady,
    /// Fatal for this pipeline; reported to observers, the worker exits.
    Fault(Fault),
}

impl Status {
    /// Stable numeric code used for worst-status folding.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Retry => 1,
            Self::NotReady => 2,
            Self::Fault(f) => f.code(),
        }
    }

    /// Whether this status is a fatal fault.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Fault(_))
    }

    /// Whether this status lets the pass continue.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// The worse of two statuses (numerically lower code).
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.code() < self.code() { other } else { self }
    }
}

impl From<Fault> for Status {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl From<std::result::Result<(), Fault>> for Status {
    fn from(res: std::result::Result<(), Fault>) -> Self {
        match res {
            Ok(()) => Self::Ok,
            Err(fault) => Self::Fault(fault),
        }
    }
}

/// Alias for `Result<T, Fault>`.
pub type Result<T> = std::result::Result<T, Fault>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Retry.code(), 1);
        assert_eq!(Status::NotReady.code(), 2);
        assert!(Status::Fault(Fault::Unknown).code() < 0);
    }

    #[test]
    fn worst_picks_the_lowest_code() {
        assert_eq!(Status::Ok.worst(Status::Retry), Status::Ok);
        assert_eq!(Status::Retry.worst(Status::NotReady), Status::Retry);
        assert_eq!(
            Status::Ok.worst(Status::Fault(Fault::Undefined)),
            Status::Fault(Fault::Undefined)
        );
    }

    #[test]
    fn faults_are_distinct() {
        let all = [
            Fault::InvalidRequest,
            Fault::InvalidValue,
            Fault::InvalidRange,
            Fault::TypeMismatch,
            Fault::NotExisting,
            Fault::Unsupported,
            Fault::Undefined,
            Fault::Unknown,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }
}
