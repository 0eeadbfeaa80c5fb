mod agent;
mod budget;
mod notify;
mod result;
mod submit;
mod task;

pub use agent::{Agent, AgentStatus, TokenUsage};
pub use budget::{BudgetConfig, BudgetState};
pub use notify::{ClientAction, ClientMessage, Notification, NotificationType, SubscribeFilter};
pub use result::{FileAction, FileChange, ResultStatus, TaskResult};
pub use submit::{
    validate_submission, ContextInput, FieldError, SubmitRequest, SubmitResponse, TaskSubmission,
    MAX_TASKS_PER_SUBMISSION,
};
pub use task::{ModelKind, Task, TaskContext, TaskPriority, TaskStatus, TaskType};
