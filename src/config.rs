//! The immutable, builder-constructed configuration bag (§4.10).

use std::path::PathBuf;
use std::sync::Arc;

use derive_builder::Builder;

use crate::error::{Error, ErrorKind, Fallible};
use crate::tls::tofu_registry::UnverifiedHostCallback;

const MAX_CREDENTIAL_LEN: usize = 1023;

pub trait BasicAuthCallback: Send + Sync {
    fn provide(&self) -> (String, String);
}

pub trait TlsPrivateKeyPasswordCallback: Send + Sync {
    fn provide(&self) -> String;
}

#[derive(Clone, Builder)]
#[builder(build_fn(validate = "Config::validate", error = "Error"))]
pub struct Config {
    #[builder(default = "\"bolt-core\".to_string()")]
    pub client_id: String,

    #[builder(default, setter(strip_option))]
    pub username: Option<String>,
    #[builder(default, setter(strip_option))]
    pub password: Option<String>,
    #[builder(default, setter(strip_option))]
    pub basic_auth_callback: Option<Arc<dyn BasicAuthCallback>>,

    #[builder(default, setter(strip_option))]
    pub tls_private_key_file: Option<PathBuf>,
    #[builder(default, setter(strip_option))]
    pub tls_private_key_password: Option<String>,
    #[builder(default, setter(strip_option))]
    pub tls_private_key_password_callback: Option<Arc<dyn TlsPrivateKeyPasswordCallback>>,
    #[builder(default, setter(strip_option))]
    pub tls_ca_file: Option<PathBuf>,
    #[builder(default, setter(strip_option))]
    pub tls_ca_dir: Option<PathBuf>,

    #[builder(default = "true")]
    pub trust_known_hosts: bool,
    #[builder(default, setter(strip_option))]
    pub known_hosts_file: Option<PathBuf>,
    #[builder(default, setter(strip_option))]
    pub unverified_host_callback: Option<Arc<dyn UnverifiedHostCallback>>,

    #[builder(default = "8192")]
    pub sndbuf_size: usize,
    #[builder(default = "8192")]
    pub rcvbuf_size: usize,
    #[builder(default, setter(strip_option))]
    pub so_sndbuf_size: Option<usize>,
    #[builder(default, setter(strip_option))]
    pub so_rcvbuf_size: Option<usize>,

    #[builder(default = "64")]
    pub max_pipelined_requests: usize,
    #[builder(default = "64")]
    pub session_request_queue_size: usize,

    #[builder(default = "0")]
    pub snd_min_chunk_size: usize,
    #[builder(default = "8192")]
    pub snd_max_chunk_size: usize,
}

impl Config {
    pub fn builder() -> ConfigBuilder { ConfigBuilder::default() }

    fn validate(builder: &ConfigBuilder) -> Result<(), Error> {
        if let Some(Some(username)) = &builder.username {
            if username.len() > MAX_CREDENTIAL_LEN {
                return Err(client_error("username exceeds 1023 bytes"));
            }
        }
        if let Some(Some(password)) = &builder.password {
            if password.len() > MAX_CREDENTIAL_LEN {
                return Err(client_error("password exceeds 1023 bytes"));
            }
        }

        let has_key_file = matches!(&builder.tls_private_key_file, Some(Some(_)));
        let has_password = matches!(&builder.tls_private_key_password, Some(Some(_)));
        let has_password_callback = matches!(&builder.tls_private_key_password_callback, Some(Some(_)));
        if (has_password || has_password_callback) && !has_key_file {
            return Err(client_error(
                "a TLS private key password (or its callback) was configured without tls_private_key_file",
            ));
        }

        if let Some(max_pipelined) = &builder.max_pipelined_requests {
            if *max_pipelined == 0 {
                return Err(client_error("max_pipelined_requests must be at least 1"));
            }
        }
        if let Some(queue_size) = &builder.session_request_queue_size {
            if *queue_size == 0 {
                return Err(client_error("session_request_queue_size must be at least 1"));
            }
        }

        let min = builder.snd_min_chunk_size.unwrap_or(0);
        let max = builder.snd_max_chunk_size.unwrap_or(8192);
        if min > max {
            return Err(client_error("snd_min_chunk_size must be <= snd_max_chunk_size"));
        }
        if max == 0 || max > 0xFFFF {
            return Err(client_error("snd_max_chunk_size must be in 1..=65535"));
        }

        Ok(())
    }

    pub fn known_hosts_path(&self) -> Fallible<PathBuf> {
        match &self.known_hosts_file {
            Some(path) => Ok(path.clone()),
            None => crate::tls::tofu_registry::default_path(),
        }
    }
}

fn client_error(message: &str) -> Error {
    Error::with_context(ErrorKind::UnexpectedError, message.to_string())
}
