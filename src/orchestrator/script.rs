//! Answer script fed to `vpn connect -s`
//!
//! One answer per line: username, password, banner acceptance, and for
//! profiles with a second factor the push method. The file is created with a
//! random name and owner-only permissions and is removed when the value is
//! dropped, on every exit path.

use crate::profile::Profile;
use crate::vault::{Credential, VaultError};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptFileError {
    #[error("{0}")]
    Invalid(#[from] VaultError),
    #[error("Failed to write answer script: {0}")]
    IoError(#[from] std::io::Error),
}

pub fn render(credential: &Credential, profile: Profile) -> Result<String, VaultError> {
    credential.validate()?;

    let mut script = String::new();
    script.push_str(&credential.username);
    script.push('\n');
    script.push_str(&credential.password);
    script.push('\n');
    script.push_str(&credential.second_factor);
    script.push('\n');
    if profile.requires_push() {
        script.push_str(&credential.push);
        script.push('\n');
    }
    Ok(script)
}

pub struct AnswerScript {
    file: NamedTempFile,
}

impl AnswerScript {
    pub fn write(credential: &Credential, profile: Profile) -> Result<Self, ScriptFileError> {
        let contents = render(credential, profile)?;

        // tempfile creates the file 0600 on unix
        let mut file = tempfile::Builder::new()
            .prefix("vpnctl-answers-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
