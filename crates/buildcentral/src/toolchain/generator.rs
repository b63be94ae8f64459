//! CMake generators known to buildcentral

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A CMake generator, identified in configuration by a short id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generator {
    Vs16,
    Vs15,
    Vs14,
    Vs12,
    Vs11,
    Vs10,
    Vs9,
    NMake,
    GreenHills,
    MinGw,
    Unix,
    EclipseMinGw,
    EclipseNMake,
    EclipseUnix,
}

/// The tool that drives a generated build tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeTool {
    /// Program name
    pub program: &'static str,
    /// Whether the tool understands `-j <jobs>`
    pub parallel: bool,
}

impl Generator {
    /// Every generator, in the order they are listed to users
    pub const ALL: [Generator; 14] = [
        Generator::Vs16,
        Generator::Vs15,
        Generator::Vs14,
        Generator::Vs12,
        Generator::Vs11,
        Generator::Vs10,
        Generator::Vs9,
        Generator::NMake,
        Generator::GreenHills,
        Generator::MinGw,
        Generator::Unix,
        Generator::EclipseMinGw,
        Generator::EclipseNMake,
        Generator::EclipseUnix,
    ];

    /// Short id used in rc files and on the command line
    pub fn id(self) -> &'static str {
        match self {
            Generator::Vs16 => "vs16",
            Generator::Vs15 => "vs15",
            Generator::Vs14 => "vs14",
            Generator::Vs12 => "vs12",
            Generator::Vs11 => "vs11",
            Generator::Vs10 => "vs10",
            Generator::Vs9 => "vs9",
            Generator::NMake => "nmake",
            Generator::GreenHills => "gh",
            Generator::MinGw => "mingw",
            Generator::Unix => "unix",
            Generator::EclipseMinGw => "emingw",
            Generator::EclipseNMake => "enmake",
            Generator::EclipseUnix => "eunix",
        }
    }

    /// Name passed to `cmake -G`
    pub fn cmake_name(self) -> &'static str {
        match self {
            Generator::Vs16 => "Visual Studio 16 2019",
            Generator::Vs15 => "Visual Studio 15 2017",
            Generator::Vs14 => "Visual Studio 14 2015",
            Generator::Vs12 => "Visual Studio 12 2013",
            Generator::Vs11 => "Visual Studio 11 2012",
            Generator::Vs10 => "Visual Studio 10 2010",
            Generator::Vs9 => "Visual Studio 9 2008",
            Generator::NMake => "NMake Makefiles",
            Generator::GreenHills => "Green Hills MULTI",
            Generator::MinGw => "MinGW Makefiles",
            Generator::Unix => "Unix Makefiles",
            Generator::EclipseMinGw => "Eclipse CDT4 - MinGW Makefiles",
            Generator::EclipseNMake => "Eclipse CDT4 - NMake Makefiles",
            Generator::EclipseUnix => "Eclipse CDT4 - Unix Makefiles",
        }
    }

    /// Visual Studio solutions have no batch build stage here
    pub fn is_visual_studio(self) -> bool {
        matches!(
            self,
            Generator::Vs16
                | Generator::Vs15
                | Generator::Vs14
                | Generator::Vs12
                | Generator::Vs11
                | Generator::Vs10
                | Generator::Vs9
        )
    }

    /// Native build tool, or `None` for IDE-only generators
    pub fn native_tool(self) -> Option<NativeTool> {
        let tool = match self {
            g if g.is_visual_studio() => return None,
            Generator::NMake | Generator::EclipseNMake => NativeTool {
                program: "nmake",
                parallel: false,
            },
            Generator::MinGw | Generator::EclipseMinGw => NativeTool {
                program: "mingw32-make",
                parallel: true,
            },
            Generator::GreenHills => NativeTool {
                program: "gbuild",
                parallel: false,
            },
            _ => NativeTool {
                program: "make",
                parallel: true,
            },
        };
        Some(tool)
    }

    /// Generator used when neither the command line nor the toolchain picks one
    pub fn platform_default(is_host: bool) -> Self {
        if cfg!(windows) && is_host {
            Generator::NMake
        } else {
            Generator::EclipseUnix
        }
    }
}

impl FromStr for Generator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Generator::ALL
            .into_iter()
            .find(|g| g.id() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Generator::ALL.iter().map(|g| g.id()).collect();
                Error::config(
                    format!("unknown generator {}", s),
                    format!("Use one of: {}", known.join(", ")),
                )
            })
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip_through_from_str() {
        for generator in Generator::ALL {
            assert_eq!(generator.id().parse::<Generator>().unwrap(), generator);
        }
    }

    #[test]
    fn test_unknown_generator() {
        assert!("ninja".parse::<Generator>().is_err());
    }

    #[test]
    fn test_native_tools() {
        assert_eq!(Generator::Vs15.native_tool(), None);
        assert_eq!(Generator::EclipseUnix.native_tool().unwrap().program, "make");
        assert!(!Generator::NMake.native_tool().unwrap().parallel);
    }
}
