use std::collections::HashMap;

use crate::stream::pb::{self, message, Message};

pub fn stack_status(stack_name: &str, status: String, deleted: bool) -> Message {
    Message {
        metadata: HashMap::new(),
        payload: Some(message::Payload::StackStatus(pb::StackStatus {
            stack_name: stack_name.to_string(),
            status,
            deleted,
        })),
    }
}

pub fn module_status(module_name: &str, stack_name: &str, status: String, deleted: bool) -> Message {
    Message {
        metadata: HashMap::new(),
        payload: Some(message::Payload::ModuleStatus(pb::ModuleStatus {
            module_name: module_name.to_string(),
            stack_name: stack_name.to_string(),
            status,
            deleted,
        })),
    }
}

pub fn version_status(name: &str, status: String, deleted: bool) -> Message {
    Message {
        metadata: HashMap::new(),
        payload: Some(message::Payload::VersionStatus(pb::VersionStatus {
            name: name.to_string(),
            status,
            deleted,
        })),
    }
}
