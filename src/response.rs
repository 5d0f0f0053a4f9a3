use serde::Serialize;

/// Envelope shared by every REST response: `{success, data?, message?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Attaches a note about side effects that did not complete; the primary
    /// change itself succeeded.
    pub fn with_notice(mut self, notice: Option<String>) -> Self {
        if let Some(notice) = notice {
            self.message = Some(match self.message.take() {
                Some(message) => format!("{}. {}", message, notice),
                None => notice,
            });
        }
        self
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_notice_is_appended_to_message() {
        let plain = ApiResponse::success(1).with_notice(None);
        assert_eq!(serde_json::to_value(&plain).unwrap(), json!({"success": true, "data": 1}));

        let noted = ApiResponse::message("You left the group").with_notice(Some("1 failed".into()));
        assert_eq!(noted.message.as_deref(), Some("You left the group. 1 failed"));
        assert!(noted.success);
    }
}
