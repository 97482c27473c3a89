// ABOUTME: Environment variable name constants and their default values
// ABOUTME: Centralized definitions of every setting consumed by the sandbox core and CLI

// Image Configuration
pub const SANDCASTLE_IMAGE: &str = "SANDCASTLE_IMAGE";
pub const SANDCASTLE_DOCKERFILE: &str = "SANDCASTLE_DOCKERFILE";
pub const SANDCASTLE_BUILD_CONTEXT: &str = "SANDCASTLE_BUILD_CONTEXT";
pub const SANDCASTLE_DOCKER_BIN: &str = "SANDCASTLE_DOCKER_BIN";

// Resource Limits
pub const SANDCASTLE_CPU_LIMIT: &str = "SANDCASTLE_CPU_LIMIT";
pub const SANDCASTLE_MEMORY_LIMIT: &str = "SANDCASTLE_MEMORY_LIMIT";
pub const SANDCASTLE_PIDS_LIMIT: &str = "SANDCASTLE_PIDS_LIMIT";

// Port Configuration
pub const SANDCASTLE_HOST_PORT: &str = "SANDCASTLE_HOST_PORT";
pub const SANDCASTLE_CONTAINER_PORT: &str = "SANDCASTLE_CONTAINER_PORT";

// Session Configuration
pub const SANDCASTLE_TIMEOUT_SECS: &str = "SANDCASTLE_TIMEOUT_SECS";
pub const SANDCASTLE_MAX_RETRIES: &str = "SANDCASTLE_MAX_RETRIES";
pub const SANDCASTLE_RETRY_DELAY_SECS: &str = "SANDCASTLE_RETRY_DELAY_SECS";
pub const SANDCASTLE_SETTLE_SECS: &str = "SANDCASTLE_SETTLE_SECS";
pub const SANDCASTLE_DEBUG: &str = "SANDCASTLE_DEBUG";

// Security Profile
pub const SANDCASTLE_USER_ID: &str = "SANDCASTLE_USER_ID";
pub const SANDCASTLE_GROUP_ID: &str = "SANDCASTLE_GROUP_ID";
pub const SANDCASTLE_NETWORK_MODE: &str = "SANDCASTLE_NETWORK_MODE";
pub const SANDCASTLE_CAP_DROP: &str = "SANDCASTLE_CAP_DROP";
pub const SANDCASTLE_CAP_ADD: &str = "SANDCASTLE_CAP_ADD";
pub const SANDCASTLE_READ_ONLY: &str = "SANDCASTLE_READ_ONLY";
pub const SANDCASTLE_VOLUMES: &str = "SANDCASTLE_VOLUMES"; // host:container,host:container
pub const SANDCASTLE_SECCOMP_PROFILE: &str = "SANDCASTLE_SECCOMP_PROFILE";

// Defaults
pub const DEFAULT_IMAGE: &str = "sandbox-image";
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_DOCKER_BIN: &str = "docker";
pub const DEFAULT_CPU_LIMIT: &str = "2";
pub const DEFAULT_MEMORY_LIMIT: &str = "1024m";
pub const DEFAULT_PIDS_LIMIT: u32 = 100;
pub const DEFAULT_HOST_PORT: u16 = 8000;
pub const DEFAULT_CONTAINER_PORT: u16 = 8000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
pub const DEFAULT_SETTLE_SECS: u64 = 2;
pub const DEFAULT_CAP_DROP: &str = "ALL";

// Upper bounds
pub const MAX_TIMEOUT_SECS: u64 = 86_400;
pub const MAX_RETRY_DELAY_SECS: u64 = 3_600;

// Protocol timing (not configurable through the environment)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;
pub const RECEIVE_WAIT_SECS: u64 = 5;
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
pub const PROBE_TIMEOUT_SECS: u64 = 3;
