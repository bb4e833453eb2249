//! Binding data model
//!
//! Shortcut keys, canonical combo ids, trigger types and the polymorphic
//! target payload a binding activates.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::hotkey::keys;

/// System (media) keys are folded into combo ids above this offset so
/// they never collide with normal virtual keycodes.
pub const SYSTEM_KEY_OFFSET: u32 = 1000;

/// A single key of a shortcut
///
/// Identity is `(keycode, is_system_event)`; the modifier flag and symbol
/// are descriptive only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortcutKey {
    pub keycode: u16,
    #[serde(default)]
    pub is_modifier: bool,
    #[serde(default)]
    pub is_system_event: bool,
    #[serde(default)]
    pub symbol: String,
}

impl ShortcutKey {
    /// A normal key reported through key-down/up or flags-changed events
    pub fn normal(keycode: u16) -> Self {
        Self {
            keycode,
            is_modifier: keys::is_modifier(keycode),
            is_system_event: false,
            symbol: keys::symbol(keycode),
        }
    }

    /// A media/function key reported through system-defined events
    pub fn system(key: u16) -> Self {
        Self {
            keycode: key,
            is_modifier: false,
            is_system_event: true,
            symbol: keys::system_symbol(key),
        }
    }

    /// Numeric code used inside a `ComboId`
    pub fn combo_code(&self) -> u32 {
        if self.is_system_event {
            SYSTEM_KEY_OFFSET + u32::from(self.keycode)
        } else {
            u32::from(self.keycode)
        }
    }
}

impl PartialEq for ShortcutKey {
    fn eq(&self, other: &Self) -> bool {
        self.keycode == other.keycode && self.is_system_event == other.is_system_event
    }
}

impl Eq for ShortcutKey {}

impl Hash for ShortcutKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.keycode.hash(state);
        self.is_system_event.hash(state);
    }
}

/// Canonical identity of a key combination: the sorted, de-duplicated
/// list of combo codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComboId(Vec<u32>);

impl ComboId {
    pub fn from_codes<I: IntoIterator<Item = u32>>(codes: I) -> Self {
        let set: BTreeSet<u32> = codes.into_iter().collect();
        Self(set.into_iter().collect())
    }

    pub fn from_keys<'a, I: IntoIterator<Item = &'a ShortcutKey>>(keys: I) -> Self {
        Self::from_codes(keys.into_iter().map(ShortcutKey::combo_code))
    }

    pub fn codes(&self) -> &[u32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every key of `self` is also in `other`
    pub fn is_subset_of(&self, other: &ComboId) -> bool {
        self.0.iter().all(|code| other.0.binary_search(code).is_ok())
    }
}

impl fmt::Display for ComboId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|&code| {
                if code >= SYSTEM_KEY_OFFSET {
                    keys::system_symbol((code - SYSTEM_KEY_OFFSET) as u16)
                } else {
                    keys::symbol(code as u16)
                }
            })
            .collect();
        write!(f, "{}", parts.join("+"))
    }
}

/// How a binding's combo must be actuated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Press,
    DoublePress,
    TriplePress,
    Hold,
}

impl TriggerType {
    /// Number of releases this trigger resolves on; `None` for hold
    pub fn press_count(self) -> Option<u8> {
        match self {
            TriggerType::Press => Some(1),
            TriggerType::DoublePress => Some(2),
            TriggerType::TriplePress => Some(3),
            TriggerType::Hold => None,
        }
    }

    pub fn from_press_count(count: u8) -> Option<Self> {
        match count {
            1 => Some(TriggerType::Press),
            2 => Some(TriggerType::DoublePress),
            3 => Some(TriggerType::TriplePress),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::Press => write!(f, "press"),
            TriggerType::DoublePress => write!(f, "double_press"),
            TriggerType::TriplePress => write!(f, "triple_press"),
            TriggerType::Hold => write!(f, "hold"),
        }
    }
}

/// What activating an app binding does when the app is already running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppBehavior {
    #[default]
    ActivateOrHide,
    CycleWindows,
}

/// Identity of an application target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Bundle or executable path used when launching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AppTarget {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.bundle_id.as_deref())
            .unwrap_or("unknown app")
    }
}

/// Where a script target's code comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ScriptSource {
    /// A shell command line run through `sh -c`
    Inline { command: String },
    /// An executable file with arguments
    File {
        path: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// One step of a macro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MacroStep {
    OpenUrl { url: String },
    OpenFile { path: PathBuf },
    RunScript { script: ScriptSource },
    Paste { text: String },
    Wait { ms: u64 },
}

/// Built-in pseudo-binding actions handled by the engine itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAction {
    /// Reveal the shortcut cheatsheet overlay while held
    Cheatsheet,
    /// Assign the frontmost app to the next pressed key
    QuickAssign,
}

impl SystemAction {
    pub fn binding_id(self) -> &'static str {
        match self {
            SystemAction::Cheatsheet => "builtin.cheatsheet",
            SystemAction::QuickAssign => "builtin.quick_assign",
        }
    }
}

/// The action payload of a binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    App {
        app: AppTarget,
        #[serde(default)]
        behavior: AppBehavior,
    },
    Url {
        url: String,
    },
    File {
        path: PathBuf,
    },
    Script {
        script: ScriptSource,
    },
    Macro {
        name: String,
        steps: Vec<MacroStep>,
    },
    Snippet {
        text: String,
    },
    System {
        action: SystemAction,
    },
}

/// Discriminant of `Target`, carried in failure events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    App,
    Url,
    File,
    Script,
    Macro,
    Snippet,
    System,
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::App { .. } => TargetKind::App,
            Target::Url { .. } => TargetKind::Url,
            Target::File { .. } => TargetKind::File,
            Target::Script { .. } => TargetKind::Script,
            Target::Macro { .. } => TargetKind::Macro,
            Target::Snippet { .. } => TargetKind::Snippet,
            Target::System { .. } => TargetKind::System,
        }
    }
}

/// A user-defined (or built-in) hotkey rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub id: String,
    /// Keys in display order; matched as an unordered set
    pub keys: Vec<ShortcutKey>,
    pub trigger: TriggerType,
    pub target: Target,
}

impl Binding {
    pub fn new(id: impl Into<String>, keys: Vec<ShortcutKey>, trigger: TriggerType, target: Target) -> Self {
        Self {
            id: id.into(),
            keys,
            trigger,
            target,
        }
    }

    /// Synthesize the pseudo-binding for a built-in action
    pub fn builtin(action: SystemAction, keys: Vec<ShortcutKey>, trigger: TriggerType) -> Self {
        Self::new(action.binding_id(), keys, trigger, Target::System { action })
    }

    pub fn combo_id(&self) -> ComboId {
        ComboId::from_keys(&self.keys)
    }

    pub fn system_action(&self) -> Option<SystemAction> {
        match self.target {
            Target::System { action } => Some(action),
            _ => None,
        }
    }
}
