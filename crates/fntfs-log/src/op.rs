//! Log operation codes.

use fntfs_error::{NtfsError, Result};
use serde::Serialize;

macro_rules! log_operations {
    ($($name:ident = $code:literal,)+) => {
        /// Redo/undo operation carried by a client log record.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(u16)]
        pub enum LogOperation {
            $($name = $code,)+
        }

        impl LogOperation {
            /// Decode an operation code; unknown codes are `UnsupportedFormat`.
            pub fn from_code(code: u16) -> Result<Self> {
                match code {
                    $($code => Ok(Self::$name),)+
                    other => Err(NtfsError::unsupported(format!("log operation {other:#x}"))),
                }
            }

            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)+
                }
            }
        }
    };
}

log_operations! {
    Noop = 0x00,
    CompensationLogRecord = 0x01,
    InitializeFileRecordSegment = 0x02,
    DeallocateFileRecordSegment = 0x03,
    WriteEndOfFileRecordSegment = 0x04,
    CreateAttribute = 0x05,
    DeleteAttribute = 0x06,
    UpdateResidentValue = 0x07,
    UpdateNonResidentValue = 0x08,
    UpdateMappingPairs = 0x09,
    DeleteDirtyClusters = 0x0A,
    SetNewAttributeSizes = 0x0B,
    AddIndexEntryRoot = 0x0C,
    DeleteIndexEntryRoot = 0x0D,
    AddIndexEntryAllocation = 0x0E,
    DeleteIndexEntryAllocation = 0x0F,
    WriteEndOfIndexBuffer = 0x10,
    SetIndexEntryVcnRoot = 0x11,
    SetIndexEntryVcnAllocation = 0x12,
    UpdateFileNameRoot = 0x13,
    UpdateFileNameAllocation = 0x14,
    SetBitsInNonResidentBitMap = 0x15,
    ClearBitsInNonResidentBitMap = 0x16,
    HotFix = 0x17,
    EndTopLevelAction = 0x18,
    PrepareTransaction = 0x19,
    CommitTransaction = 0x1A,
    ForgetTransaction = 0x1B,
    OpenNonResidentAttribute = 0x1C,
    OpenAttributeTableDump = 0x1D,
    AttributeNamesDump = 0x1E,
    DirtyPageTableDump = 0x1F,
    TransactionTableDump = 0x20,
    UpdateRecordDataRoot = 0x21,
    UpdateRecordDataAllocation = 0x22,
}

impl LogOperation {
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Operations that mark transaction boundaries or checkpoints rather
    /// than change a page.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(
            self,
            Self::PrepareTransaction
                | Self::CommitTransaction
                | Self::ForgetTransaction
                | Self::EndTopLevelAction
                | Self::OpenNonResidentAttribute
                | Self::OpenAttributeTableDump
                | Self::AttributeNamesDump
                | Self::DirtyPageTableDump
                | Self::TransactionTableDump
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_and_unknown_rejected() {
        for code in 0x00..=0x22_u16 {
            let op = LogOperation::from_code(code).unwrap();
            assert_eq!(op.code(), code, "case=code_{code:#x}");
        }
        assert_eq!(
            LogOperation::from_code(0x1A).unwrap(),
            LogOperation::CommitTransaction
        );
        assert!(matches!(
            LogOperation::from_code(0x23),
            Err(NtfsError::UnsupportedFormat(_))
        ));
        assert_eq!(LogOperation::SetBitsInNonResidentBitMap.name(), "SetBitsInNonResidentBitMap");
        assert!(LogOperation::ForgetTransaction.is_control());
        assert!(!LogOperation::UpdateNonResidentValue.is_control());
    }
}
