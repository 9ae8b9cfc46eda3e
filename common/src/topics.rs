pub const TOPIC_CONTROLLER_STATE: &str = "reflow/controller/state";
pub const TOPIC_CONTROLLER_STATUS: &str = "reflow/controller/status";
pub const TOPIC_CONTROLLER_EVENT: &str = "reflow/controller/event";
pub const TOPIC_CONTROLLER_AVAILABILITY: &str = "reflow/controller/availability";

pub const TOPIC_CMD_MANUAL: &str = "reflow/controller/cmd/manual";
pub const TOPIC_CMD_PROFILE: &str = "reflow/controller/cmd/profile";
pub const TOPIC_CMD_START: &str = "reflow/controller/cmd/start";
pub const TOPIC_CMD_STOP: &str = "reflow/controller/cmd/stop";
