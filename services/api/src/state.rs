//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the provider registry and the retrieval index.

use crate::{audio::decode::DecodePool, config::Config, config::SessionSettings};
use avatar_core::{prompt::PromptSet, registry::ProviderRegistry, retrieval::ContextStore};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub registry: ProviderRegistry,
    pub context_store: Arc<ContextStore>,
    pub prompts: Arc<PromptSet>,
    pub decoder: Arc<DecodePool>,
    pub session_settings: Arc<SessionSettings>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: ProviderRegistry,
        context_store: ContextStore,
        prompts: PromptSet,
    ) -> Self {
        let decoder = DecodePool::from_settings(&config.decoder);
        Self {
            registry,
            context_store: Arc::new(context_store),
            prompts: Arc::new(prompts),
            decoder: Arc::new(decoder),
            session_settings: Arc::new(config.session.clone()),
            config: Arc::new(config),
        }
    }
}
