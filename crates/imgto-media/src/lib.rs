//! imgto media - Cloudinary-compatible service client
//!
//! Provides:
//! - [`CloudinaryClient`], implementing the pipeline's media service and
//!   fetcher boundaries over HTTP
//! - Upload request signing, locally or through a signing endpoint
//! - [`MediaConfig`] with `CLOUDINARY_*` environment overrides

#![warn(unreachable_pub)]

pub mod client;
pub mod config;
pub mod error;
pub mod signing;

pub use client::{classify_upload_error, CloudinaryClient, HttpFetcher};
pub use config::MediaConfig;
pub use error::{MediaError, Result};
pub use signing::{sign_params, LocalSigner, RemoteSigner, SignatureAlgorithm, Signer};
