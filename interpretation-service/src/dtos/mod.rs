pub mod submission;
pub mod tasks;

pub use submission::{SubmissionForm, SubmissionResponse, UploadedFile};
pub use tasks::{
    BatchDeleteRequest, BatchDeleteResponse, DataResponse, FormsPage, FormsQueryParams,
    MessageResponse, Pagination, StatusPage, StatusQueryParams, TaskDetail, TaskSummary,
    UpdateContentRequest,
};
