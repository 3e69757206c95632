//! Types most action authors need, in one import.
//!
//! ```
//! use resource_actions::prelude::*;
//!
//! let action = Action::new("Publish").field(Field::boolean("Notify"));
//! assert_eq!(action.uri_key(), "publish");
//! ```

pub use crate::action::{
    Action, ActionFields, ActionInvocation, ActionRequest, ActionResponse, Field, PivotContext,
    QueueOptions,
};
pub use crate::config::ActionConfig;
pub use crate::core::{ActionError, Actor, Model, Result};
pub use crate::queue::{PendingBatch, RetryPolicy};
pub use crate::runtime::ActionRuntime;
pub use crate::storage::TargetSelection;
