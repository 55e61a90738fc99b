use std::path::Path;

use color_eyre::eyre::{self, WrapErr as _};

/// Brings a local checkout up to date with its upstream.
pub trait Checkout: Send + Sync {
    fn sync(&self, path: &Path) -> eyre::Result<()>;
}

/// Fetches `origin/<branch>` and hard-resets the work tree onto it.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    branch: String,
}

impl GitCheckout {
    pub fn new(branch: String) -> Self {
        Self { branch }
    }
}

impl Checkout for GitCheckout {
    fn sync(&self, path: &Path) -> eyre::Result<()> {
        let repo = open(path).wrap_err("Failed to open playbook repo")?;
        fetch(&repo, &self.branch).wrap_err("Failed to fetch playbook repo")?;
        reset_to_remote(&repo, &self.branch).wrap_err("Failed to reset playbook repo")
    }
}

fn open(path: &Path) -> Result<git2::Repository, git2::Error> {
    match git2::Repository::open(path) {
        Ok(repo) => {
            tracing::info!(
                path = path.to_string_lossy().as_ref(),
                "Opened repo at {:?}",
                path
            );
            Ok(repo)
        }
        Err(err) => {
            tracing::error!(
                path = path.to_string_lossy().as_ref(),
                "Failed to open repo at {:?}: {}",
                path,
                err
            );
            Err(err)
        }
    }
}

fn fetch(repo: &git2::Repository, branch: &str) -> Result<(), git2::Error> {
    let mut origin = match repo.find_remote("origin") {
        Ok(remote) => remote,
        Err(err) => {
            tracing::error!("Failed to find remote `origin`: {}", err);
            return Err(err);
        }
    };

    let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", branch);
    if let Err(err) = origin.fetch(&[refspec.as_str()], None, None) {
        tracing::error!("Failed to fetch origin/{}: {}", branch, err);
        return Err(err);
    }

    Ok(())
}

fn reset_to_remote(repo: &git2::Repository, branch: &str) -> Result<(), git2::Error> {
    let remote_ref = format!("refs/remotes/origin/{}", branch);
    let commit = match repo
        .find_reference(&remote_ref)
        .and_then(|reference| reference.peel_to_commit())
    {
        Ok(commit) => commit,
        Err(err) => {
            tracing::error!("Failed to find commit for `{}`: {}", remote_ref, err);
            return Err(err);
        }
    };
    if let Err(err) = repo.reset(
        commit.as_object(),
        git2::ResetType::Hard,
        Some(git2::build::CheckoutBuilder::new().force()),
    ) {
        tracing::error!("Failed to reset repo: {}", err);
        return Err(err);
    }
    tracing::info!("Playbook repo is at {} ({})", commit.id(), remote_ref);
    Ok(())
}
