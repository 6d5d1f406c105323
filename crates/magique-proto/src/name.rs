//! Agent and platform naming
//!
//! A platform is named `"<host-or-ip>:<port>"` and an agent hosted on it is
//! named `"<short>@<platform>"`. Both parsers reject anything else; callers
//! treat the error as a programming mistake and never retry it.

use crate::NameError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network identity of a platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlatformName {
    host: String,
    port: u16,
}

impl PlatformName {
    /// Create a platform name from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `"<host>:<port>"`
    pub fn parse(name: &str) -> Result<Self, NameError> {
        let malformed = || NameError::Platform(name.to_string());

        let (host, port) = name.rsplit_once(':').ok_or_else(malformed)?;
        if host.is_empty() || host.contains('@') || host.chars().any(char::is_whitespace) {
            return Err(malformed());
        }
        let port = port.parse::<u16>().map_err(|_| malformed())?;

        Ok(Self::new(host, port))
    }

    /// Host or IP part
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

impl fmt::Display for PlatformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PlatformName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Qualified agent name, unique across every platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentName {
    short: String,
    platform: PlatformName,
}

impl AgentName {
    /// Qualify a short name with the platform hosting it
    pub fn new(short: impl Into<String>, platform: PlatformName) -> Self {
        Self {
            short: short.into(),
            platform,
        }
    }

    /// Parse `"<short>@<host>:<port>"`
    pub fn parse(name: &str) -> Result<Self, NameError> {
        let malformed = || NameError::Agent(name.to_string());

        let (short, platform) = name.split_once('@').ok_or_else(malformed)?;
        if short.is_empty() || platform.contains('@') {
            return Err(malformed());
        }
        let platform = PlatformName::parse(platform).map_err(|_| malformed())?;

        Ok(Self::new(short, platform))
    }

    /// Short part, before the `@`
    pub fn short(&self) -> &str {
        &self.short
    }

    /// Platform hosting this agent
    pub fn platform(&self) -> &PlatformName {
        &self.platform
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.short, self.platform)
    }
}

impl FromStr for AgentName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Short part of a possibly qualified name
pub fn short_name(name: &str) -> &str {
    name.split_once('@').map_or(name, |(short, _)| short)
}

/// Qualified name of `name` hosted on `platform`; any existing suffix is replaced
pub fn qualify(name: &str, platform: &PlatformName) -> AgentName {
    AgentName::new(short_name(name), platform.clone())
}
