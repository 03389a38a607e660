use thiserror::Error;

use crate::{
    cache::CacheError, config::LoadError, infra::error::InfraError, proxy::RegistrationError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}
