//! VPN connection profiles
//!
//! The set is closed: each profile maps to the vendor's connection target
//! string and decides whether the answer script carries a push line.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown VPN profile: {0}")]
pub struct UnknownProfile(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Corporate intranet
    Intra,
    /// Development network, requires a second-factor push
    Dev,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::Intra, Profile::Dev];

    /// Name used on the command line and in the session store
    pub fn name(self) -> &'static str {
        match self {
            Profile::Intra => "intra",
            Profile::Dev => "dev",
        }
    }

    /// Connection target passed to `vpn connect <target>`
    pub fn target(self) -> &'static str {
        match self {
            Profile::Intra => "INTRA",
            Profile::Dev => "DEV-VPN-REMOTE",
        }
    }

    pub fn requires_push(self) -> bool {
        matches!(self, Profile::Dev)
    }
}

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intra" => Ok(Profile::Intra),
            "dev" => Ok(Profile::Dev),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parse() {
        assert_eq!("intra".parse::<Profile>().unwrap(), Profile::Intra);
        assert_eq!("dev".parse::<Profile>().unwrap(), Profile::Dev);
        assert!("INTRA".parse::<Profile>().is_err());
        assert!("".parse::<Profile>().is_err());
    }

    #[test]
    fn test_unknown_profile_message() {
        let err = "prod".parse::<Profile>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown VPN profile: prod");
    }

    #[test]
    fn test_targets() {
        assert_eq!(Profile::Intra.target(), "INTRA");
        assert_eq!(Profile::Dev.target(), "DEV-VPN-REMOTE");
    }

    #[test]
    fn test_push_only_for_dev() {
        assert!(Profile::Dev.requires_push());
        assert!(!Profile::Intra.requires_push());
    }

    #[test]
    fn test_name_round_trips_through_display() {
        for profile in Profile::ALL {
            assert_eq!(profile.to_string().parse::<Profile>().unwrap(), profile);
        }
    }
}
