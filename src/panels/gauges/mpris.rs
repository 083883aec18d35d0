// Media player gauge driven by MPRIS over the session bus.
// Consumes Settings: halcyon.gauge.mpris.max_chars, halcyon.gauge.mpris.poll_interval_ms.
use crate::icon::truncate_chars;
use crate::panels::gauges::gauge::{
    ActionSelectAction, Gauge, GaugeActionDialog, GaugeActionItem, GaugeClick, GaugeClickAction,
    GaugeDisplay, GaugeInput, GaugeModel, GaugeRegistrar,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::panels::gauges::poll_source::{PollHandle, PollSource, poller};
use crate::settings;
use crate::settings::SettingSpec;
use iced::mouse;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::OwnedValue;

const DEFAULT_MAX_CHARS: usize = 25;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const IDLE_RUN_INTERVAL_SECS: u64 = 300;
const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const MPRIS_PLAYER_IFACE: &str = "org.mpris.MediaPlayer2.Player";

const PLAYING_GLYPH: &str = "󰏤";
const PAUSED_GLYPH: &str = "󰐊";
const PREVIOUS_GLYPH: &str = "󰒮";
const NEXT_GLYPH: &str = "󰒭";
const SHUFFLE_ON_GLYPH: &str = "󰒝";
const SHUFFLE_OFF_GLYPH: &str = "󰒞";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    fn parse(raw: &str) -> Self {
        match raw {
            "Playing" => PlaybackStatus::Playing,
            "Paused" => PlaybackStatus::Paused,
            _ => PlaybackStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopStatus {
    None,
    Playlist,
    Track,
}

impl LoopStatus {
    fn parse(raw: &str) -> Self {
        match raw {
            "Playlist" => LoopStatus::Playlist,
            "Track" => LoopStatus::Track,
            _ => LoopStatus::None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LoopStatus::None => "None",
            LoopStatus::Playlist => "Playlist",
            LoopStatus::Track => "Track",
        }
    }

    fn next(self) -> Self {
        match self {
            LoopStatus::None => LoopStatus::Playlist,
            LoopStatus::Playlist => LoopStatus::Track,
            LoopStatus::Track => LoopStatus::None,
        }
    }

    fn glyph(self) -> &'static str {
        match self {
            LoopStatus::None => "󰑗",
            LoopStatus::Playlist => "󰑖",
            LoopStatus::Track => "󰑘",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlayerState {
    bus_name: String,
    status: PlaybackStatus,
    title: Option<String>,
    artists: Vec<String>,
    album: Option<String>,
    shuffle: bool,
    loop_status: LoopStatus,
}

impl PlayerState {
    fn label(&self) -> String {
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or("—");
        if self.artists.is_empty() {
            title.to_string()
        } else {
            format!("{} - {title}", self.artists.join(", "))
        }
    }

    fn player_name(&self) -> &str {
        self.bus_name
            .strip_prefix(MPRIS_PREFIX)
            .and_then(|rest| rest.split('.').next())
            .unwrap_or(&self.bus_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerCommand {
    PlayPause,
    Next,
    Previous,
    SetShuffle(bool),
    SetLoop(LoopStatus),
}

type MprisSample = Result<Option<PlayerState>, String>;

/// Prefer a playing player, then the first paused one, then whatever is listed first.
fn pick_player(players: &[PlayerState]) -> Option<&PlayerState> {
    players
        .iter()
        .find(|player| player.status == PlaybackStatus::Playing)
        .or_else(|| {
            players
                .iter()
                .find(|player| player.status == PlaybackStatus::Paused)
        })
        .or_else(|| players.first())
}

fn value_string(metadata: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|value| value.try_clone().ok())
        .and_then(|value| value.try_into().ok())
}

fn value_strings(metadata: &HashMap<String, OwnedValue>, key: &str) -> Vec<String> {
    metadata
        .get(key)
        .and_then(|value| value.try_clone().ok())
        .and_then(|value| value.try_into().ok())
        .unwrap_or_default()
}

fn player_proxy<'a>(connection: &'a Connection, bus_name: &'a str) -> zbus::Result<Proxy<'a>> {
    Proxy::new(connection, bus_name, MPRIS_PATH, MPRIS_PLAYER_IFACE)
}

fn read_player(connection: &Connection, bus_name: &str) -> zbus::Result<PlayerState> {
    let proxy = player_proxy(connection, bus_name)?;
    let status: String = proxy.get_property("PlaybackStatus")?;
    let metadata: HashMap<String, OwnedValue> = proxy.get_property("Metadata").unwrap_or_default();
    // Not every player implements the optional properties.
    let shuffle: bool = proxy.get_property("Shuffle").unwrap_or(false);
    let loop_status: String = proxy
        .get_property("LoopStatus")
        .unwrap_or_else(|_| "None".to_string());

    Ok(PlayerState {
        bus_name: bus_name.to_string(),
        status: PlaybackStatus::parse(&status),
        title: value_string(&metadata, "xesam:title"),
        artists: value_strings(&metadata, "xesam:artist"),
        album: value_string(&metadata, "xesam:album"),
        shuffle,
        loop_status: LoopStatus::parse(&loop_status),
    })
}

fn list_player_names(connection: &Connection) -> zbus::Result<Vec<String>> {
    let dbus = Proxy::new(
        connection,
        "org.freedesktop.DBus",
        "/org/freedesktop/DBus",
        "org.freedesktop.DBus",
    )?;
    let names: Vec<String> = dbus.call("ListNames", &())?;
    let mut players: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with(MPRIS_PREFIX))
        .collect();
    players.sort();
    Ok(players)
}

/// Samples players over one long-lived session bus connection.
struct MprisSampler {
    connection: Option<Connection>,
}

impl MprisSampler {
    fn sample(&mut self) -> MprisSample {
        if self.connection.is_none() {
            self.connection = Some(Connection::session().map_err(|err| err.to_string())?);
        }
        let Some(connection) = self.connection.as_ref() else {
            return Ok(None);
        };
        let names = match list_player_names(connection) {
            Ok(names) => names,
            Err(err) => {
                self.connection = None;
                return Err(err.to_string());
            }
        };
        let players: Vec<PlayerState> = names
            .iter()
            .filter_map(|name| read_player(connection, name).ok())
            .collect();
        Ok(pick_player(&players).cloned())
    }
}

fn send_command(bus_name: &str, command: PlayerCommand) -> Result<(), String> {
    let connection = Connection::session().map_err(|err| err.to_string())?;
    let proxy = player_proxy(&connection, bus_name).map_err(|err| err.to_string())?;
    let result = match command {
        PlayerCommand::PlayPause => proxy.call_method("PlayPause", &()).map(|_| ()),
        PlayerCommand::Next => proxy.call_method("Next", &()).map(|_| ()),
        PlayerCommand::Previous => proxy.call_method("Previous", &()).map(|_| ()),
        PlayerCommand::SetShuffle(shuffle) => proxy
            .set_property("Shuffle", shuffle)
            .map_err(zbus::Error::from),
        PlayerCommand::SetLoop(status) => proxy
            .set_property("LoopStatus", status.as_str())
            .map_err(zbus::Error::from),
    };
    result.map_err(|err| format!("{command:?} on {bus_name} failed: {err}"))
}

fn dispatch(bus_name: String, command: PlayerCommand, waker: mpsc::Sender<()>) {
    thread::spawn(move || {
        if let Err(err) = send_command(&bus_name, command) {
            log::warn!("mpris gauge: {err}");
        }
        let _ = waker.send(());
    });
}

fn click_command(input: GaugeInput, player: &PlayerState) -> Option<PlayerCommand> {
    match input {
        GaugeInput::Button(mouse::Button::Left) => Some(PlayerCommand::PlayPause),
        GaugeInput::Button(mouse::Button::Middle) => {
            Some(PlayerCommand::SetLoop(player.loop_status.next()))
        }
        GaugeInput::ScrollUp => Some(PlayerCommand::Next),
        GaugeInput::ScrollDown => Some(PlayerCommand::Previous),
        GaugeInput::Button(_) => None,
    }
}

fn action_command(action_id: &str, player: &PlayerState) -> Option<PlayerCommand> {
    match action_id {
        "previous" => Some(PlayerCommand::Previous),
        "play_pause" => Some(PlayerCommand::PlayPause),
        "next" => Some(PlayerCommand::Next),
        "shuffle" => Some(PlayerCommand::SetShuffle(!player.shuffle)),
        "loop" => Some(PlayerCommand::SetLoop(player.loop_status.next())),
        _ => None,
    }
}

fn status_glyph(status: PlaybackStatus) -> &'static str {
    if status == PlaybackStatus::Playing {
        PLAYING_GLYPH
    } else {
        PAUSED_GLYPH
    }
}

fn action_items(player: &PlayerState) -> Vec<GaugeActionItem> {
    let item = |id: &str, glyph: &str, label: &str| GaugeActionItem {
        id: id.to_string(),
        glyph: glyph.to_string(),
        label: label.to_string(),
    };
    let playing = player.status == PlaybackStatus::Playing;
    vec![
        item("previous", PREVIOUS_GLYPH, "Previous"),
        item(
            "play_pause",
            status_glyph(player.status),
            if playing { "Pause" } else { "Play" },
        ),
        item("next", NEXT_GLYPH, "Next"),
        item(
            "shuffle",
            if player.shuffle {
                SHUFFLE_ON_GLYPH
            } else {
                SHUFFLE_OFF_GLYPH
            },
            if player.shuffle {
                "Shuffle: on"
            } else {
                "Shuffle: off"
            },
        ),
        item(
            "loop",
            player.loop_status.glyph(),
            &format!("Loop: {}", player.loop_status.as_str()),
        ),
    ]
}

fn dialog_title(player: &PlayerState) -> String {
    match &player.album {
        Some(album) if !album.trim().is_empty() => {
            format!("{} ({album}) on {}", player.label(), player.player_name())
        }
        _ => format!("{} on {}", player.label(), player.player_name()),
    }
}

struct MprisGauge {
    handle: PollHandle<MprisSample>,
    event_source: Option<PollSource<MprisSample>>,
    max_chars: usize,
    next_deadline: Instant,
}

impl Gauge for MprisGauge {
    fn id(&self) -> &'static str {
        "mpris"
    }

    fn register(&mut self, registrar: &mut dyn GaugeRegistrar) {
        if let Some(event_source) = self.event_source.take() {
            registrar.add_event_source(Box::new(event_source));
        }
    }

    fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
        self.next_deadline = now + Duration::from_secs(IDLE_RUN_INTERVAL_SECS);
        let player = match self.handle.latest()? {
            Ok(Some(player)) => player,
            Ok(None) => return Some(GaugeModel::new("mpris", None, GaugeDisplay::Empty)),
            Err(err) => {
                log::warn!("mpris gauge: {err}");
                return Some(GaugeModel::new("mpris", None, GaugeDisplay::Error));
            }
        };

        let on_click: GaugeClickAction = {
            let player = player.clone();
            let waker = self.handle.waker();
            Arc::new(move |click: GaugeClick| {
                if let Some(command) = click_command(click.input, &player) {
                    dispatch(player.bus_name.clone(), command, waker.clone());
                }
            })
        };
        let on_action: ActionSelectAction = {
            let player = player.clone();
            let waker = self.handle.waker();
            Arc::new(move |action_id: String| {
                if let Some(command) = action_command(&action_id, &player) {
                    dispatch(player.bus_name.clone(), command, waker.clone());
                }
            })
        };

        let mut model = GaugeModel::new(
            "mpris",
            Some(status_glyph(player.status).to_string()),
            GaugeDisplay::text(truncate_chars(&player.label(), self.max_chars)),
        );
        model.on_click = Some(on_click);
        model.action_dialog = Some(GaugeActionDialog {
            title: dialog_title(&player),
            items: action_items(&player),
            on_select: Some(on_action),
        });
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let settings = settings::settings();
    let max_chars = settings.get_parsed_or("halcyon.gauge.mpris.max_chars", DEFAULT_MAX_CHARS);
    let poll_interval_ms =
        settings.get_parsed_or("halcyon.gauge.mpris.poll_interval_ms", DEFAULT_POLL_INTERVAL_MS);
    let mut sampler = MprisSampler { connection: None };
    let (handle, event_source) = poller(
        "mpris",
        Duration::from_millis(poll_interval_ms.max(100)),
        move || sampler.sample(),
    );
    Box::new(MprisGauge {
        handle,
        event_source: Some(event_source),
        max_chars: max_chars.max(1),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.gauge.mpris.max_chars",
            default: "25",
        },
        SettingSpec {
            key: "halcyon.gauge.mpris.poll_interval_ms",
            default: "1000",
        },
    ];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "mpris",
        description: "Media player gauge with playback controls for MPRIS players.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str, status: PlaybackStatus) -> PlayerState {
        PlayerState {
            bus_name: format!("{MPRIS_PREFIX}{name}"),
            status,
            title: Some("Blue in Green".to_string()),
            artists: vec!["Miles Davis".to_string()],
            album: Some("Kind of Blue".to_string()),
            shuffle: false,
            loop_status: LoopStatus::None,
        }
    }

    #[test]
    fn loop_cycles_none_playlist_track() {
        assert_eq!(LoopStatus::None.next(), LoopStatus::Playlist);
        assert_eq!(LoopStatus::Playlist.next(), LoopStatus::Track);
        assert_eq!(LoopStatus::Track.next(), LoopStatus::None);
        assert_eq!(LoopStatus::parse("bogus"), LoopStatus::None);
    }

    #[test]
    fn playing_player_wins() {
        let players = vec![
            player("vlc", PlaybackStatus::Stopped),
            player("spotify", PlaybackStatus::Paused),
            player("firefox.instance_1_2", PlaybackStatus::Playing),
        ];
        let picked = pick_player(&players).expect("a player");
        assert_eq!(picked.player_name(), "firefox");
        assert!(pick_player(&players[..2]).is_some_and(|p| p.player_name() == "spotify"));
        assert!(pick_player(&[]).is_none());
    }

    #[test]
    fn label_joins_artist_and_title() {
        let mut state = player("mpv", PlaybackStatus::Playing);
        assert_eq!(state.label(), "Miles Davis - Blue in Green");
        state.artists.clear();
        state.title = Some("  ".to_string());
        assert_eq!(state.label(), "—");
        assert_eq!(
            truncate_chars("Miles Davis - Blue in Green", 12),
            "Miles Davis…"
        );
    }

    #[test]
    fn inputs_map_to_commands() {
        let state = player("mpv", PlaybackStatus::Playing);
        assert_eq!(
            click_command(GaugeInput::Button(mouse::Button::Left), &state),
            Some(PlayerCommand::PlayPause)
        );
        assert_eq!(
            click_command(GaugeInput::Button(mouse::Button::Middle), &state),
            Some(PlayerCommand::SetLoop(LoopStatus::Playlist))
        );
        assert_eq!(
            click_command(GaugeInput::ScrollUp, &state),
            Some(PlayerCommand::Next)
        );
        assert_eq!(
            click_command(GaugeInput::Button(mouse::Button::Right), &state),
            None
        );
        assert_eq!(
            action_command("shuffle", &state),
            Some(PlayerCommand::SetShuffle(true))
        );
        assert_eq!(action_command("unknown", &state), None);
    }

    #[test]
    fn action_dialog_reflects_state() {
        let state = player("spotify", PlaybackStatus::Paused);
        let items = action_items(&state);
        let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["previous", "play_pause", "next", "shuffle", "loop"]);
        assert_eq!(items[1].label, "Play");
        assert_eq!(items[4].label, "Loop: None");
        assert_eq!(
            dialog_title(&state),
            "Miles Davis - Blue in Green (Kind of Blue) on spotify"
        );
    }
}
