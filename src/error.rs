//! Error types for the allocator core.
//!
//! Mirrors the externally visible error kinds from §7 of the design: `NoSpace`,
//! `Invalid`, `Uninit`, `Exist` and `NoMem`. Built with `error-chain` so that
//! internal plumbing (tree probes, transaction callbacks) can attach context
//! via `.chain_err(...)` while callers still match on a small, stable enum.

error_chain::error_chain! {
    errors {
        /// `reserve` could not be satisfied even after a forced aging flush, or
        /// `format` was asked for a capacity too small to hold a header and at
        /// least 100 blocks.
        NoSpace {
            description("no space available")
            display("no space available")
        }
        /// An argument was out of range, a classified free range straddled a
        /// bitmap-chunk boundary, a hint-sequence invariant was violated, a
        /// `free` targeted a range that does not exist, or a bitmap bit-range
        /// was misaligned to its class.
        Invalid(msg: String) {
            description("invalid argument or invariant violation")
            display("invalid: {}", msg)
        }
        /// `load` was called on a device whose header magic does not match.
        Uninit {
            description("backing device is not formatted")
            display("backing device is not formatted")
        }
        /// `format` without `force` was called on an already-formatted device.
        Exist {
            description("backing device is already formatted")
            display("backing device is already formatted")
        }
        /// An in-memory allocation failed.
        NoMem {
            description("allocation failure")
            display("allocation failure")
        }
    }
}

impl Error {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        ErrorKind::Invalid(msg.into()).into()
    }
}
