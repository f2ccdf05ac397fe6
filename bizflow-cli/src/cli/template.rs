//! Template CLI commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// Create a template from a YAML or JSON draft
    Create {
        /// Template draft file (`.yaml`, `.yml` or `.json`)
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Publish a new version of a template
    Revise {
        /// Template ID of the version being revised (UUID)
        template_id: String,

        /// Template draft file (`.yaml`, `.yml` or `.json`)
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List the company's templates
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show one template version
    Get {
        /// Template ID (UUID)
        template_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List every version of a template lineage
    Versions {
        /// Lineage ID shared by all versions (UUID)
        lineage_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Stop new workflows from using a template version
    Deactivate {
        /// Template ID (UUID)
        template_id: String,
    },
}
