pub mod audit;
pub mod error;
pub mod exclude;
pub mod identity;

/// 公共API的prelude模块
/// 用户可以通过 `use app::prelude::*` 来导入最常用的类型
pub mod prelude {
    pub use crate::audit::{
        cancellation, run_audit, AuditMode, AuditParams, AuditReport, AuditStatus, CancelToken,
        Canceller, EntryResult, Remediator, Reporter,
    };
    pub use crate::error::AuditError;
    pub use crate::exclude::ExclusionMatcher;
    pub use crate::identity::IdentitySet;
}
