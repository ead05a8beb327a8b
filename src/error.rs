//! The error taxonomy exposed through the last-error registers and the
//! block-request return path. See the kernel module's `IMR_ERR_*` constants
//! for the origin of these codes.

use derive_more::Display;

/// Numeric codes mirrored by the last-read/last-write error registers.
///
/// `0` is reserved by the registers themselves to mean "no error"; this enum
/// never represents that state, so codes start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u32)]
pub enum ImrError {
    #[display(fmt = "lba beyond device capacity")]
    OutRange = 1,
    #[display(fmt = "read crosses a zone boundary")]
    ReadBorder = 2,
    #[display(fmt = "write crosses a zone boundary")]
    WriteBorder = 3,
    #[display(fmt = "read of an unmapped block")]
    ReadPointer = 4,
    #[display(fmt = "write to a read-only zone")]
    WriteRo = 5,
    /// Reserved; not raised by the current rule set (see spec §7).
    #[display(fmt = "write inconsistent with zone pointer semantics")]
    WritePointer = 6,
    #[display(fmt = "write not aligned to a block boundary")]
    WriteAlign = 7,
    #[display(fmt = "write to a saturated or full zone")]
    WriteFull = 8,
    #[display(fmt = "zone is offline")]
    ZoneOffline = 9,
    #[display(fmt = "request violated policy and no override is configured")]
    OutOfPolicy = 10,
}

impl ImrError {
    /// The numeric code stored in a last-error register.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Recovers an `ImrError` from a last-error register value, if any.
    pub fn from_code(code: u32) -> Option<Self> {
        use ImrError::*;
        Some(match code {
            1 => OutRange,
            2 => ReadBorder,
            3 => WriteBorder,
            4 => ReadPointer,
            5 => WriteRo,
            6 => WritePointer,
            7 => WriteAlign,
            8 => WriteFull,
            9 => ZoneOffline,
            10 => OutOfPolicy,
            _ => return None,
        })
    }
}

impl From<ImrError> for &'static str {
    fn from(err: ImrError) -> Self {
        match err {
            ImrError::OutRange => "OUT_RANGE",
            ImrError::ReadBorder => "READ_BORDER",
            ImrError::WriteBorder => "WRITE_BORDER",
            ImrError::ReadPointer => "READ_POINTER",
            ImrError::WriteRo => "WRITE_RO",
            ImrError::WritePointer => "WRITE_POINTER",
            ImrError::WriteAlign => "WRITE_ALIGN",
            ImrError::WriteFull => "WRITE_FULL",
            ImrError::ZoneOffline => "ZONE_OFFLINE",
            ImrError::OutOfPolicy => "OUT_OF_POLICY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips() {
        for err in [
            ImrError::OutRange,
            ImrError::ReadBorder,
            ImrError::WriteBorder,
            ImrError::ReadPointer,
            ImrError::WriteRo,
            ImrError::WritePointer,
            ImrError::WriteAlign,
            ImrError::WriteFull,
            ImrError::ZoneOffline,
            ImrError::OutOfPolicy,
        ] {
            assert_eq!(ImrError::from_code(err.code()), Some(err));
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(ImrError::from_code(0), None);
        assert_eq!(ImrError::from_code(255), None);
    }
}
