//! BuildID computation.
//!
//! Single-package requests keep a human-readable identifier so artifacts can
//! be served straight off the URL path. Multi-package bundles canonicalize
//! (sort) their inputs and hash them, so any permutation of the same request
//! lands on the same artifact.

use data_encoding::BASE32;
use sha1::{Digest, Sha1};
use std::path::Path;

use crate::request::{join_refs, BuildRequest, PackageRef};
use crate::{Error, Result};

/// Compute the BuildID for a request. Pure; no I/O.
pub fn fingerprint(request: &BuildRequest, bv: u32) -> Result<String> {
    if request.packages.is_empty() {
        return Err(Error::BadRequest("no packages".to_string()));
    }

    if request.packages.len() == 1 {
        return Ok(single_id(request, bv));
    }
    Ok(bundle_id(request, bv))
}

fn single_id(request: &BuildRequest, bv: u32) -> String {
    let pkg = &request.packages[0];

    let mut filename = if pkg.submodule.is_empty() {
        basename(&pkg.name).to_string()
    } else {
        pkg.submodule.clone()
    };
    if request.dev {
        filename.push_str(".development");
    }

    let target_segment = if request.externals.is_empty() {
        request.target.as_str().to_string()
    } else {
        format!(
            "external={}/{}",
            join_refs(&request.externals).replace('/', "_"),
            request.target
        )
    };

    format!(
        "v{bv}/{}@{}/{target_segment}/{filename}",
        pkg.name, pkg.version
    )
}

fn bundle_id(request: &BuildRequest, bv: u32) -> String {
    let mut packages = request.packages.clone();
    let mut externals = request.externals.clone();
    packages.sort_by(ref_order);
    externals.sort_by(ref_order);

    let canonical = format!(
        "v{bv}/{}/{}/{}/{}",
        join_refs(&packages),
        join_refs(&externals),
        request.target,
        request.dev
    );

    let digest = Sha1::digest(canonical.as_bytes());
    format!("bundle-{}", BASE32.encode(digest.as_slice()).to_lowercase())
}

/// Total order over refs: name, then version, then submodule.
fn ref_order(a: &PackageRef, b: &PackageRef) -> std::cmp::Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.submodule.cmp(&b.submodule))
}

fn basename(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}
