//! Path handler modules and registration (spec §6's full path table).

pub mod listing;
pub mod processes;
pub mod projects;
pub mod sessions;

use crate::registry::PathRegistry;

/// Register every path handler named in spec §6.
pub fn register_all(registry: &mut PathRegistry) {
    register_projects(registry);
    register_sessions(registry);
    register_processes(registry);
    register_listing(registry);
}

fn register_projects(registry: &mut PathRegistry) {
    registry.register("GET", "/projects", projects::ListProjects);
    registry.register("POST", "/projects", projects::AddProject);
}

fn register_sessions(registry: &mut PathRegistry) {
    registry.register("GET", "/projects/:id/sessions/:sid", sessions::GetSession);
    registry.register("GET", "/projects/:id/sessions/:sid/metadata", sessions::GetSessionMetadata);
    registry.register("PUT", "/projects/:id/sessions/:sid/metadata", sessions::PutSessionMetadata);
    registry.register("POST", "/projects/:id/sessions", sessions::StartOrCreateSession);
    registry.register("POST", "/projects/:id/sessions/:sid/resume", sessions::ResumeSession);
    registry.register("POST", "/sessions/:sid/messages", sessions::QueueMessage);
    registry.register("POST", "/sessions/:sid/input", sessions::RespondToInput);
    registry.register("PUT", "/sessions/:sid/mode", sessions::SetMode);
    registry.register("PUT", "/sessions/:sid/hold", sessions::SetHold);
}

fn register_processes(registry: &mut PathRegistry) {
    registry.register("POST", "/processes/:pid/abort", processes::AbortProcess);
    registry.register("POST", "/processes/:pid/interrupt", processes::InterruptProcess);
}

fn register_listing(registry: &mut PathRegistry) {
    registry.register("GET", "/sessions", listing::ListSessions);
    registry.register("GET", "/inbox", listing::GetInbox);
}
