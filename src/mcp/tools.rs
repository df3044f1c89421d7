//! MCP Tool definitions and handlers
//!
//! Tools are thin consumers of the account manager and the local file
//! accessor; all access control lives there.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::auth::AccountManager;
use crate::error::{McpError, Result};
use crate::google::client::{GoogleClient, Profile};
use crate::local::LocalFiles;
use crate::mcp::types::{CallToolResult, Tool};

/// Tool handler
pub struct ToolHandler {
    accounts: Arc<AccountManager>,
    google: GoogleClient,
    files: Arc<LocalFiles>,
}

impl ToolHandler {
    /// Create a new tool handler
    pub fn new(accounts: Arc<AccountManager>, google: GoogleClient, files: Arc<LocalFiles>) -> Self {
        Self {
            accounts,
            google,
            files,
        }
    }

    /// List all available tools
    pub fn list_tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "list_accounts",
                description: "Lists the configured Google accounts and their email addresses",
                input_schema: json!({"type": "object", "properties": {}}),
            },
            Tool {
                name: "get_profile",
                description: "Gets the mailbox profile of one account, or of every account with \"all\"",
                input_schema: account_schema(),
            },
            Tool {
                name: "local_read_file",
                description: "Reads a text file from the allowed local directories",
                input_schema: path_schema(true),
            },
            Tool {
                name: "local_write_file",
                description: "Writes a text file into the first read-write local directory",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to the allowed directories"},
                        "content": {"type": "string", "description": "Text to write"}
                    },
                    "required": ["path", "content"]
                }),
            },
            Tool {
                name: "local_list_dir",
                description: "Lists a directory in the allowed local directories",
                input_schema: path_schema(false),
            },
            Tool {
                name: "local_stat",
                description: "Gets size and type of a file or directory in the allowed local directories",
                input_schema: path_schema(true),
            },
        ]
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, args: Value) -> CallToolResult {
        match name {
            "list_accounts" => self.handle_list_accounts().await,
            "get_profile" => self.handle_get_profile(args).await,
            "local_read_file" => self.handle_read_file(args),
            "local_write_file" => self.handle_write_file(args),
            "local_list_dir" => self.handle_list_dir(args),
            "local_stat" => self.handle_stat(args),
            _ => CallToolResult::error(
                McpError::UnknownTool {
                    name: name.to_string(),
                }
                .to_string(),
            ),
        }
    }

    // ==================== Account Tools ====================

    async fn handle_list_accounts(&self) -> CallToolResult {
        let accounts = self.accounts.list_accounts().await;
        if accounts.is_empty() {
            return CallToolResult::text("No accounts configured.");
        }

        let lines: Vec<String> = accounts
            .iter()
            .map(|(name, email)| match email.as_str() {
                "" => format!("{} (email not yet known)", name),
                email => format!("{} <{}>", name, email),
            })
            .collect();
        CallToolResult::text(lines.join("\n"))
    }

    async fn handle_get_profile(&self, args: Value) -> CallToolResult {
        #[derive(Deserialize)]
        struct Args {
            account: String,
        }

        let args: Args = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return e,
        };

        let names = match self.accounts.resolve(&args.account).await {
            Ok(names) => names,
            Err(e) => return CallToolResult::error(e.to_string()),
        };

        let mut lines = Vec::with_capacity(names.len());
        let mut failures = 0;
        for name in &names {
            match self.profile_for(name).await {
                Ok(p) => lines.push(format!(
                    "{}: {} ({} messages, {} threads)",
                    name,
                    p.email_address,
                    p.messages_total.unwrap_or_default(),
                    p.threads_total.unwrap_or_default()
                )),
                Err(e) => {
                    failures += 1;
                    lines.push(format!("{}: {}", name, e));
                }
            }
        }

        if failures == names.len() {
            CallToolResult::error(lines.join("\n"))
        } else {
            CallToolResult::text(lines.join("\n"))
        }
    }

    /// Fetch the profile and remember the account's email if it changed
    async fn profile_for(&self, name: &str) -> Result<Profile> {
        let source = self.accounts.token_source(name).await?;
        let profile = self.google.profile(&source).await?;

        let known = self.accounts.list_accounts().await;
        if known.get(name) != Some(&profile.email_address) {
            if let Err(e) = self
                .accounts
                .store()
                .set_email(name, &profile.email_address)
                .await
            {
                warn!(account = name, error = %e, "failed to save account email");
            }
        }

        Ok(profile)
    }

    // ==================== Local File Tools ====================

    fn handle_read_file(&self, args: Value) -> CallToolResult {
        let args: PathArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return e,
        };

        match self.files.read_file(&args.path) {
            Ok((bytes, dir)) => match String::from_utf8(bytes) {
                Ok(text) => CallToolResult::text(text),
                Err(e) => CallToolResult::error(format!(
                    "{} in {} is not UTF-8 text ({} bytes)",
                    args.path,
                    dir.display(),
                    e.as_bytes().len()
                )),
            },
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    fn handle_write_file(&self, args: Value) -> CallToolResult {
        #[derive(Deserialize)]
        struct Args {
            path: String,
            content: String,
        }

        let args: Args = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return e,
        };

        match self.files.write_file(&args.path, args.content.as_bytes()) {
            Ok(dir) => CallToolResult::text(format!(
                "Wrote {} bytes to {} in {}",
                args.content.len(),
                args.path,
                dir.display()
            )),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    fn handle_list_dir(&self, args: Value) -> CallToolResult {
        let args: PathArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return e,
        };

        match self.files.list_dir(&args.path) {
            Ok((entries, dir)) => {
                let mut text = format!("{} ({} entries)\n", dir.join(&args.path).display(), entries.len());
                for entry in entries {
                    if entry.is_dir {
                        text.push_str(&format!("{}/\n", entry.name));
                    } else {
                        text.push_str(&format!("{} ({} bytes)\n", entry.name, entry.size));
                    }
                }
                CallToolResult::text(text)
            }
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    fn handle_stat(&self, args: Value) -> CallToolResult {
        let args: PathArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return e,
        };

        match self.files.stat(&args.path) {
            Ok((stat, dir)) => match serde_json::to_value(&stat) {
                Ok(mut value) => {
                    value["directory"] = json!(dir.display().to_string());
                    CallToolResult::text(value.to_string())
                }
                Err(e) => CallToolResult::error(e.to_string()),
            },
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct PathArgs {
    #[serde(default)]
    path: String,
}

fn parse_args<T: DeserializeOwned>(args: Value) -> std::result::Result<T, CallToolResult> {
    serde_json::from_value(args).map_err(|e| {
        CallToolResult::error(
            McpError::InvalidArguments {
                message: e.to_string(),
            }
            .to_string(),
        )
    })
}

fn account_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "account": {
                "type": "string",
                "description": "Account name, or \"all\" for every configured account"
            }
        },
        "required": ["account"]
    })
}

fn path_schema(required: bool) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "Path relative to the allowed directories"
            }
        }
    });
    if required {
        schema["required"] = json!(["path"]);
    }
    schema
}
