use std::{fmt::Display, str::FromStr};

/// Audio bitrate in kbit/s, written `128K` on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrate(u16);

impl Default for Bitrate {
    fn default() -> Self {
        Self(128)
    }
}

impl FromStr for Bitrate {
    type Err = Box<dyn std::error::Error + Sync + Send>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().strip_suffix('k') {
            Some(num_prefix) => match num_prefix.parse()? {
                0 => Err(Box::from("Bitrate must be positive")),
                n => Ok(Self(n)),
            },
            None => Err(Box::from("Bitrate does not end with 'K'")),
        }
    }
}

impl Display for Bitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}k", self.0)
    }
}
