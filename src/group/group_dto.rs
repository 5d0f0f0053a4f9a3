use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::conversation::GroupInfoPatch;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(url)]
    pub avatar_url: Option<String>,
    /// Initial members other than the caller.
    #[validate(length(min = 2, max = 256))]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateGroupRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(url)]
    pub avatar_url: Option<String>,
}

impl From<UpdateGroupRequest> for GroupInfoPatch {
    fn from(request: UpdateGroupRequest) -> Self {
        Self {
            name: request.name,
            description: request.description,
            avatar_url: request.avatar_url,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddGroupMembersRequest {
    #[validate(length(min = 1, max = 256))]
    pub user_ids: Vec<Uuid>,
}
