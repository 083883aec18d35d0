// Sway backend over swayipc.
use swayipc::{Connection, Event, EventType, Node, NodeType};

use super::{ActiveWindow, CompositorBackend, CompositorEvent, Workspace};

pub struct SwayBackend {
    connection: Connection,
}

impl SwayBackend {
    pub fn connect() -> Result<Self, String> {
        let connection = Connection::new().map_err(|err| format!("sway ipc: {err}"))?;
        Ok(Self { connection })
    }
}

fn to_workspace(workspace: swayipc::Workspace) -> Workspace {
    Workspace {
        id: workspace.num,
        occupied: !workspace.focus.is_empty(),
        name: workspace.name,
        focused: workspace.focused,
        urgent: workspace.urgent,
    }
}

/// Only real windows count; a focused workspace node means an empty desktop.
fn window_from_node(node: &Node) -> Option<ActiveWindow> {
    if !matches!(node.node_type, NodeType::Con | NodeType::FloatingCon) {
        return None;
    }
    let class = node
        .app_id
        .clone()
        .or_else(|| {
            node.window_properties
                .as_ref()
                .and_then(|props| props.class.clone())
        })
        .unwrap_or_default();
    let title = node.name.clone().unwrap_or_default();
    Some(ActiveWindow { class, title })
}

impl CompositorBackend for SwayBackend {
    fn name(&self) -> &'static str {
        "sway"
    }

    fn workspaces(&mut self) -> Result<Vec<Workspace>, String> {
        let mut workspaces: Vec<Workspace> = self
            .connection
            .get_workspaces()
            .map_err(|err| format!("get_workspaces: {err}"))?
            .into_iter()
            .map(to_workspace)
            .collect();
        workspaces.sort_by_key(|workspace| workspace.id);
        Ok(workspaces)
    }

    fn active_window(&mut self) -> Result<Option<ActiveWindow>, String> {
        let tree = self
            .connection
            .get_tree()
            .map_err(|err| format!("get_tree: {err}"))?;
        Ok(tree
            .find_focused_as_ref(|node| node.focused)
            .and_then(window_from_node))
    }

    fn focus_workspace(&mut self, id: i32) -> Result<(), String> {
        let outcomes = self
            .connection
            .run_command(format!("workspace number {id}"))
            .map_err(|err| format!("workspace {id}: {err}"))?;
        for outcome in outcomes {
            outcome.map_err(|err| format!("workspace {id}: {err}"))?;
        }
        Ok(())
    }

    fn watch(&mut self, on_event: &mut dyn FnMut(CompositorEvent)) -> Result<(), String> {
        let events = Connection::new()
            .and_then(|connection| connection.subscribe([EventType::Workspace, EventType::Window]))
            .map_err(|err| format!("sway subscribe: {err}"))?;
        for event in events {
            match event {
                Ok(Event::Workspace(_)) | Ok(Event::Window(_)) => on_event(CompositorEvent::Refresh),
                Ok(_) => {}
                Err(err) => return Err(format!("sway event stream: {err}")),
            }
        }
        Ok(())
    }
}
