// Hyprland backend over the request socket (JSON replies) and the `.socket2` event stream.
use std::env;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::{ActiveWindow, CompositorBackend, CompositorEvent, Workspace};

const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct WorkspaceReply {
    id: i32,
    name: String,
    #[serde(default)]
    windows: u32,
}

#[derive(Debug, Deserialize)]
struct ActiveWorkspaceReply {
    id: i32,
}

#[derive(Debug, Default, Deserialize)]
struct ActiveWindowReply {
    #[serde(default)]
    class: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ClientReply {
    address: String,
    workspace: ActiveWorkspaceReply,
}

pub struct HyprlandBackend {
    socket_dir: PathBuf,
}

impl HyprlandBackend {
    pub fn from_env() -> Result<Self, String> {
        let signature = env::var("HYPRLAND_INSTANCE_SIGNATURE")
            .map_err(|_| "HYPRLAND_INSTANCE_SIGNATURE is not set".to_string())?;
        let runtime_dir = env::var("XDG_RUNTIME_DIR").ok();
        let socket_dir = socket_dir(runtime_dir.as_deref(), &signature);
        if !socket_dir.join(".socket.sock").exists() {
            return Err(format!("Hyprland socket missing in {}", socket_dir.display()));
        }
        Ok(Self { socket_dir })
    }

    fn request(&self, command: &str) -> Result<String, String> {
        request_at(&self.socket_dir, command)
    }
}

/// `$XDG_RUNTIME_DIR/hypr/<sig>` for current releases, `/tmp/hypr/<sig>` for older ones.
fn socket_dir(runtime_dir: Option<&str>, signature: &str) -> PathBuf {
    if let Some(runtime_dir) = runtime_dir {
        let dir = Path::new(runtime_dir).join("hypr").join(signature);
        if dir.exists() {
            return dir;
        }
    }
    Path::new("/tmp/hypr").join(signature)
}

fn request_at(socket_dir: &Path, command: &str) -> Result<String, String> {
    let path = socket_dir.join(".socket.sock");
    let mut stream = UnixStream::connect(&path)
        .map_err(|err| format!("failed to connect to {}: {err}", path.display()))?;
    let _ = stream.set_read_timeout(Some(SOCKET_TIMEOUT));
    let _ = stream.set_write_timeout(Some(SOCKET_TIMEOUT));
    stream
        .write_all(command.as_bytes())
        .map_err(|err| format!("failed to send '{command}': {err}"))?;
    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .map_err(|err| format!("failed to read reply to '{command}': {err}"))?;
    Ok(reply)
}

fn parse_workspaces(workspaces_json: &str, active_json: &str) -> Result<Vec<Workspace>, String> {
    let replies: Vec<WorkspaceReply> =
        serde_json::from_str(workspaces_json).map_err(|err| format!("bad workspaces reply: {err}"))?;
    let active: Option<ActiveWorkspaceReply> = serde_json::from_str(active_json).ok();
    let active_id = active.map(|reply| reply.id);

    let mut workspaces: Vec<Workspace> = replies
        .into_iter()
        // Special workspaces (scratchpads) carry negative ids.
        .filter(|reply| reply.id > 0)
        .map(|reply| Workspace {
            id: reply.id,
            name: reply.name,
            focused: Some(reply.id) == active_id,
            occupied: reply.windows > 0,
            urgent: false,
        })
        .collect();
    workspaces.sort_by_key(|workspace| workspace.id);
    Ok(workspaces)
}

/// An empty object is returned when nothing has focus.
fn parse_active_window(json: &str) -> Result<Option<ActiveWindow>, String> {
    let reply: ActiveWindowReply =
        serde_json::from_str(json).map_err(|err| format!("bad activewindow reply: {err}"))?;
    if reply.class.is_empty() && reply.title.is_empty() {
        return Ok(None);
    }
    Ok(Some(ActiveWindow {
        class: reply.class,
        title: reply.title,
    }))
}

/// Workspace id of the client at `address` (given without the `0x` prefix in events).
fn workspace_of_client(clients_json: &str, address: &str) -> Option<i32> {
    let clients: Vec<ClientReply> = serde_json::from_str(clients_json).ok()?;
    let address = address.trim_start_matches("0x");
    clients
        .into_iter()
        .find(|client| client.address.trim_start_matches("0x") == address)
        .map(|client| client.workspace.id)
}

/// Split `event>>data` lines from `.socket2.sock`.
fn parse_event(line: &str) -> Option<(&str, &str)> {
    line.split_once(">>")
}

fn triggers_refresh(event: &str) -> bool {
    matches!(
        event,
        "workspace"
            | "workspacev2"
            | "focusedmon"
            | "focusedmonv2"
            | "activewindow"
            | "activewindowv2"
            | "createworkspace"
            | "createworkspacev2"
            | "destroyworkspace"
            | "destroyworkspacev2"
            | "renameworkspace"
            | "moveworkspace"
            | "moveworkspacev2"
            | "openwindow"
            | "closewindow"
            | "movewindow"
            | "movewindowv2"
            | "windowtitle"
            | "windowtitlev2"
    )
}

impl CompositorBackend for HyprlandBackend {
    fn name(&self) -> &'static str {
        "Hyprland"
    }

    fn workspaces(&mut self) -> Result<Vec<Workspace>, String> {
        let workspaces = self.request("j/workspaces")?;
        let active = self.request("j/activeworkspace")?;
        parse_workspaces(&workspaces, &active)
    }

    fn active_window(&mut self) -> Result<Option<ActiveWindow>, String> {
        parse_active_window(&self.request("j/activewindow")?)
    }

    fn focus_workspace(&mut self, id: i32) -> Result<(), String> {
        let reply = self.request(&format!("dispatch workspace {id}"))?;
        if reply.trim() == "ok" {
            Ok(())
        } else {
            Err(format!("workspace {id}: {}", reply.trim()))
        }
    }

    fn watch(&mut self, on_event: &mut dyn FnMut(CompositorEvent)) -> Result<(), String> {
        let path = self.socket_dir.join(".socket2.sock");
        let stream = UnixStream::connect(&path)
            .map_err(|err| format!("failed to connect to {}: {err}", path.display()))?;

        for line in BufReader::new(stream).lines() {
            let line = line.map_err(|err| format!("event stream error: {err}"))?;
            let Some((event, data)) = parse_event(&line) else {
                continue;
            };
            if event == "urgent" {
                let clients = self.request("j/clients")?;
                if let Some(workspace) = workspace_of_client(&clients, data) {
                    on_event(CompositorEvent::Urgent(workspace));
                }
            } else if triggers_refresh(event) {
                on_event(CompositorEvent::Refresh);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKSPACES: &str = r#"[
        {"id": 2, "name": "2", "monitor": "DP-1", "windows": 0, "hasfullscreen": false},
        {"id": 1, "name": "1", "monitor": "DP-1", "windows": 3, "hasfullscreen": false},
        {"id": -98, "name": "special:scratch", "monitor": "DP-1", "windows": 1}
    ]"#;

    #[test]
    fn workspaces_are_sorted_and_marked_focused() {
        let workspaces = parse_workspaces(WORKSPACES, r#"{"id": 2, "name": "2"}"#).expect("parse");
        let ids: Vec<i32> = workspaces.iter().map(|ws| ws.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(workspaces[0].occupied && !workspaces[0].focused);
        assert!(!workspaces[1].occupied && workspaces[1].focused);
    }

    #[test]
    fn empty_active_window_means_desktop() {
        assert_eq!(parse_active_window("{}").expect("parse"), None);
        let window = parse_active_window(r#"{"class": "firefox", "title": "Docs", "pid": 4}"#)
            .expect("parse")
            .expect("window");
        assert_eq!(window.class, "firefox");
        assert_eq!(window.title, "Docs");
        assert!(parse_active_window("not json").is_err());
    }

    #[test]
    fn urgent_address_resolves_to_workspace() {
        let clients = r#"[
            {"address": "0x55d1a0", "workspace": {"id": 4, "name": "4"}, "class": "kitty"},
            {"address": "0x55d1b8", "workspace": {"id": 7, "name": "7"}, "class": "slack"}
        ]"#;
        assert_eq!(workspace_of_client(clients, "55d1b8"), Some(7));
        assert_eq!(workspace_of_client(clients, "dead"), None);
    }

    #[test]
    fn events_split_on_marker() {
        assert_eq!(parse_event("workspace>>3"), Some(("workspace", "3")));
        assert_eq!(
            parse_event("activewindow>>kitty,~/src>>x"),
            Some(("activewindow", "kitty,~/src>>x"))
        );
        assert_eq!(parse_event("garbage"), None);
        assert!(triggers_refresh("openwindow"));
        assert!(!triggers_refresh("submap"));
    }

    #[test]
    fn socket_dir_falls_back_to_tmp() {
        let dir = socket_dir(Some("/nonexistent-runtime"), "sig");
        assert_eq!(dir, PathBuf::from("/tmp/hypr/sig"));
    }
}
