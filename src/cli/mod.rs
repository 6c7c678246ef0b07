//! Command-line interface for tacman.
//!
//! Every subcommand maps onto one service operation; argument parsing is
//! done with clap.

mod commands;

use clap::{Parser, Subcommand};

/// tacman - TACACS+ policy administration
/// Manages identities, devices and access rules, and compiles them into
/// tac_plus-ng configuration
#[derive(Parser)]
#[command(name = "tacman")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create default config file
    #[command(alias = "--init")]
    Init,

    /// Manage identities
    #[command(alias = "user")]
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage identity groups and their members
    #[command(alias = "group")]
    Groups {
        #[command(subcommand)]
        command: GroupCommands,
    },

    /// Manage devices
    #[command(alias = "device", alias = "hosts")]
    Devices {
        #[command(subcommand)]
        command: DeviceCommands,
    },

    /// Manage device groups and their members
    #[command(alias = "host-groups")]
    DeviceGroups {
        #[command(subcommand)]
        command: DeviceGroupCommands,
    },

    /// Link identity groups to device groups
    #[command(alias = "policy")]
    Policies {
        #[command(subcommand)]
        command: PolicyCommands,
    },

    /// Manage access rules
    #[command(alias = "rule")]
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },

    /// Show what an identity may do on every device
    #[command(alias = "user-hosts")]
    Access {
        /// Identity name
        identity: String,
    },

    /// Evaluate one identity against one device
    Evaluate {
        /// Identity name
        identity: String,
        /// Device name or address
        device: String,
        /// Service to evaluate
        #[arg(long)]
        service: Option<String>,
        /// Command line to check against the rule's command filter
        #[arg(long)]
        command: Option<String>,
    },

    /// Manage TOTP second factors
    Totp {
        #[command(subcommand)]
        command: TotpCommands,
    },

    /// Check an identity's credentials
    Auth {
        /// Identity name
        username: String,
        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
        /// TOTP code
        #[arg(long)]
        totp: Option<String>,
        /// Address of the device the login comes through
        #[arg(long)]
        device: Option<String>,
    },

    /// Show recent authentication attempts
    #[command(alias = "history")]
    Log {
        /// Number of entries to show
        #[arg(default_value = "20")]
        limit: u64,
    },

    /// Compile the policy and publish the daemon configuration
    Apply {
        /// Print the artifacts instead of publishing them
        #[arg(long)]
        dry_run: bool,
        /// Publish even when an artifact has no records
        #[arg(long)]
        allow_empty: bool,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create or update an identity
    Put {
        name: String,
        /// Password to set
        #[arg(long, conflicts_with_all = ["clear_password", "password_hash"])]
        password: Option<String>,
        /// Ready-made bcrypt hash ($2b$...) to store as is
        #[arg(long, conflicts_with = "clear_password")]
        password_hash: Option<String>,
        /// Remove the stored password
        #[arg(long)]
        clear_password: bool,
        /// Create or leave the identity disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Show one identity
    Show { name: String },
    /// List all identities
    #[command(alias = "ls")]
    List,
    Enable { name: String },
    Disable { name: String },
    /// Set an attribute
    SetAttr {
        name: String,
        key: String,
        value: String,
    },
    /// Remove an attribute
    UnsetAttr { name: String, key: String },
    /// Delete an identity (disables it instead when it has login history)
    #[command(alias = "rm")]
    Delete {
        name: String,
        /// Delete even when login history references the identity
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// Create or update an identity group
    Put {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        disabled: bool,
    },
    /// Show a group and its members
    Show { name: String },
    #[command(alias = "ls")]
    List,
    #[command(alias = "rm")]
    Delete { name: String },
    /// Add an identity to a group
    AddMember {
        identity: String,
        group: String,
        /// Lower numbers take precedence
        #[arg(long, default_value = "100")]
        priority: i32,
    },
    /// Remove an identity from a group
    RemoveMember { identity: String, group: String },
}

#[derive(Subcommand)]
pub enum DeviceCommands {
    /// Create or update a device
    Put {
        name: String,
        /// IP address or CIDR prefix
        address: String,
        /// Shared TACACS+ key
        #[arg(long)]
        secret: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        disabled: bool,
    },
    /// Show a device by name or address
    Show { device: String },
    #[command(alias = "ls")]
    List,
    #[command(alias = "rm")]
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum DeviceGroupCommands {
    /// Create or update a device group
    Put {
        name: String,
        /// Shared key applied to member devices
        #[arg(long)]
        secret: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show a device group and its members
    Show { name: String },
    #[command(alias = "ls")]
    List,
    #[command(alias = "rm")]
    Delete { name: String },
    /// Add a device to a device group
    Add { device: String, group: String },
    /// Remove a device from a device group
    Remove { device: String, group: String },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Allow a group's rules to apply on a device group
    Link { group: String, device_group: String },
    Unlink { group: String, device_group: String },
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum RuleCommands {
    /// Create an access rule for an identity or a group
    Create {
        #[arg(long, required_unless_present = "group", conflicts_with = "group")]
        identity: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        device_group: String,
        /// Defaults to "exec"
        #[arg(long)]
        service: Option<String>,
        #[arg(long, default_value = "1")]
        priv_lvl: i32,
        /// permit or deny
        #[arg(long, default_value = "permit")]
        action: String,
        /// Command filter entry as ACTION:PATTERN, in evaluation order
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Attribute-value pair as KEY=VALUE
        #[arg(long = "av")]
        av_pairs: Vec<String>,
    },
    /// Append a command filter entry to a rule
    AddFilter {
        rule_id: i32,
        /// permit or deny
        action: String,
        pattern: String,
    },
    #[command(alias = "rm")]
    Delete { rule_id: i32 },
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum TotpCommands {
    /// Generate a new secret for an identity
    Provision {
        identity: String,
        #[arg(long)]
        issuer: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        digits: Option<u32>,
        #[arg(long)]
        period: Option<u32>,
        /// SHA1, SHA256 or SHA512
        #[arg(long)]
        algorithm: Option<String>,
    },
    /// Show the secret of a profile that is not enabled yet
    Reveal { identity: String },
    /// Enable a profile with a code from the authenticator app
    Enable { identity: String, code: String },
    /// Check a code
    Verify { identity: String, code: String },
    Disable { identity: String },
    #[command(alias = "rm")]
    Delete { identity: String },
    /// Show the profile state
    Status { identity: String },
}

pub use commands::*;
