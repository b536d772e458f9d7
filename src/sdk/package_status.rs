use std::fmt;

/// Final outcome of a `send_package` call, reported exactly once per
/// package.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PackageStatus {
    #[default]
    Unspecified,

    /// Every fragment of the package left through the Transport.
    Sent,

    /// Some fragment failed to encode or send; the package did not (fully)
    /// leave.
    FailedGeneric,

    /// The package's deadline passed before its last fragment could fire.
    FailedTimeout,
}

const PACKAGE_STATUS_SENT_STR: &str = "sent";
const PACKAGE_STATUS_FAILED_GENERIC_STR: &str = "failed-generic";
const PACKAGE_STATUS_FAILED_TIMEOUT_STR: &str = "failed-timeout";

impl From<&str> for PackageStatus {
    fn from(raw: &str) -> Self {
        match raw {
            PACKAGE_STATUS_SENT_STR => PackageStatus::Sent,
            PACKAGE_STATUS_FAILED_GENERIC_STR => PackageStatus::FailedGeneric,
            PACKAGE_STATUS_FAILED_TIMEOUT_STR => PackageStatus::FailedTimeout,
            _ => PackageStatus::Unspecified,
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            PackageStatus::Sent => PACKAGE_STATUS_SENT_STR,
            PackageStatus::FailedGeneric => PACKAGE_STATUS_FAILED_GENERIC_STR,
            PackageStatus::FailedTimeout => PACKAGE_STATUS_FAILED_TIMEOUT_STR,
            PackageStatus::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}
