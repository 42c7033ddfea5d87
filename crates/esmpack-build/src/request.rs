//! Build request model: package references, targets, options.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A reference to one package at an exact version, optionally narrowed to a
/// submodule path inside the package.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
    pub submodule: String,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            submodule: String::new(),
        }
    }

    pub fn with_submodule(mut self, submodule: impl Into<String>) -> Self {
        self.submodule = submodule.into();
        self
    }

    /// The import path clients and generated stubs use:
    /// `name[/submodule]`.
    pub fn import_path(&self) -> String {
        if self.submodule.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.name, self.submodule)
        }
    }

    /// `name@version[/submodule]`.
    pub fn spec(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)?;
        if !self.submodule.is_empty() {
            write!(f, "/{}", self.submodule)?;
        }
        Ok(())
    }
}

/// Render a ref list the way fingerprints and banners consume it.
pub(crate) fn join_refs(refs: &[PackageRef]) -> String {
    refs.iter()
        .map(PackageRef::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Engine targets accepted by the service. `Deno` maps to the engine's
/// latest syntax level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Deno,
    Es2015,
    Es2016,
    Es2017,
    Es2018,
    Es2019,
    Es2020,
}

impl Target {
    /// The request-facing name, used in BuildIDs and artifact URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Deno => "deno",
            Target::Es2015 => "es2015",
            Target::Es2016 => "es2016",
            Target::Es2017 => "es2017",
            Target::Es2018 => "es2018",
            Target::Es2019 => "es2019",
            Target::Es2020 => "es2020",
        }
    }

    /// The syntax level handed to the bundler.
    pub fn engine_level(&self) -> &'static str {
        match self {
            Target::Deno => "esnext",
            other => other.as_str(),
        }
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deno" => Ok(Target::Deno),
            "es2015" => Ok(Target::Es2015),
            "es2016" => Ok(Target::Es2016),
            "es2017" => Ok(Target::Es2017),
            "es2018" => Ok(Target::Es2018),
            "es2019" => Ok(Target::Es2019),
            "es2020" => Ok(Target::Es2020),
            other => Err(Error::BadRequest(format!("unknown target: {other}"))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized build request.
///
/// `externals` pins the CDN URL used for matching external dependencies; the
/// pinned version wins over whatever the peer declaration asks for.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub packages: Vec<PackageRef>,
    pub externals: Vec<PackageRef>,
    pub target: Target,
    pub dev: bool,
}

impl BuildRequest {
    pub fn new(packages: Vec<PackageRef>, target: Target) -> Self {
        Self {
            packages,
            externals: Vec::new(),
            target,
            dev: false,
        }
    }

    pub fn with_externals(mut self, externals: Vec<PackageRef>) -> Self {
        self.externals = externals;
        self
    }

    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// The environment name baked into NODE_ENV and the banner.
    pub fn env(&self) -> &'static str {
        if self.dev {
            "development"
        } else {
            "production"
        }
    }
}
