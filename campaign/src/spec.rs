//! Test specifications and the combination space they generate.
//!
//! A [Specification] names the candidate values for each fuzzed parameter. Every
//! specification is scoped against exactly one context axis: either the vehicle's
//! onboard states (a test is triggered when the vehicle reports that state) or
//! geofence actions (a test is triggered once, whatever the vehicle is doing).
//!
//! [generate] expands a specification into its [Space]: the Cartesian product of
//! every non-empty parameter list, in the fixed field order `(mode, throttle, context)`.
//! Throttle levels are remapped to physical stick values using a per-mode table.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, ops::RangeInclusive, str::FromStr};

/// Mode used to remap throttle levels when a specification fuzzes no modes.
pub const DEFAULT_MODE: Mode = Mode::Posctl;

/// Valid throttle levels.
pub const THROTTLE_LEVELS: RangeInclusive<u8> = 1..=5;

/// Physical throttle values for position and altitude control (neutral is 550).
const POSCTL_THROTTLE: [i32; 5] = [0, 260, 550, 600, 615];

/// Physical throttle values for stabilized flight (neutral is 435).
const STABILIZED_THROTTLE: [i32; 5] = [0, 225, 435, 445, 450];

/// Flight modes that can be requested from the autopilot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "ALTCTL")]
    Altctl,
    #[serde(rename = "POSCTL")]
    Posctl,
    #[serde(rename = "OFFBOARD")]
    Offboard,
    #[serde(rename = "STABILIZED")]
    Stabilized,
    #[serde(rename = "AUTO.LOITER")]
    AutoLoiter,
    #[serde(rename = "AUTO.RTL")]
    AutoRtl,
    #[serde(rename = "AUTO.LAND")]
    AutoLand,
}

impl Mode {
    /// Name of the mode as understood by the autopilot.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Mode::Altctl => "ALTCTL",
            Mode::Posctl => "POSCTL",
            Mode::Offboard => "OFFBOARD",
            Mode::Stabilized => "STABILIZED",
            Mode::AutoLoiter => "AUTO.LOITER",
            Mode::AutoRtl => "AUTO.RTL",
            Mode::AutoLand => "AUTO.LAND",
        }
    }

    /// Throttle table used while flying in this mode.
    ///
    /// Modes without a dedicated table use the [DEFAULT_MODE] table.
    const fn throttle_table(&self) -> &'static [i32; 5] {
        match self {
            Mode::Stabilized => &STABILIZED_THROTTLE,
            _ => &POSCTL_THROTTLE,
        }
    }

    /// Physical throttle value for `level` in this mode.
    ///
    /// Levels past the end of the table saturate at its last entry.
    pub fn throttle(&self, level: u8) -> i32 {
        let table = self.throttle_table();
        table[usize::from(level).min(table.len() - 1)]
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALTCTL" => Ok(Mode::Altctl),
            "POSCTL" => Ok(Mode::Posctl),
            "OFFBOARD" => Ok(Mode::Offboard),
            "STABILIZED" => Ok(Mode::Stabilized),
            "AUTO.LOITER" => Ok(Mode::AutoLoiter),
            "AUTO.RTL" => Ok(Mode::AutoRtl),
            "AUTO.LAND" => Ok(Mode::AutoLand),
            other => Err(Error::InvalidSpec(format!("unknown mode: {other}"))),
        }
    }
}

/// Action taken by the autopilot on a geofence breach (the `GF_ACTION` parameter).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GeofenceAction {
    None = 0,
    Warning = 1,
    Hold = 2,
    Return = 3,
    Terminate = 4,
    Land = 5,
}

impl GeofenceAction {
    /// Parameter value of the action.
    pub const fn code(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for GeofenceAction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GeofenceAction::None),
            1 => Ok(GeofenceAction::Warning),
            2 => Ok(GeofenceAction::Hold),
            3 => Ok(GeofenceAction::Return),
            4 => Ok(GeofenceAction::Terminate),
            5 => Ok(GeofenceAction::Land),
            other => Err(Error::InvalidSpec(format!("unknown geofence action: {other}"))),
        }
    }
}

impl From<GeofenceAction> for u8 {
    fn from(action: GeofenceAction) -> Self {
        action.code()
    }
}

impl fmt::Display for GeofenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeofenceAction::None => "None",
            GeofenceAction::Warning => "Warning",
            GeofenceAction::Hold => "Hold mode",
            GeofenceAction::Return => "Return mode",
            GeofenceAction::Terminate => "Terminate",
            GeofenceAction::Land => "Land mode",
        };
        f.write_str(name)
    }
}

/// Which parameters a [Specification] fuzzes.
///
/// Fixed when the specification is constructed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Kind {
    pub modes: bool,
    pub throttle: bool,
    pub states: bool,
    pub geofence: bool,
}

impl Kind {
    /// The context axis of the campaign.
    pub fn scope(&self) -> Scope {
        if self.geofence {
            Scope::Geofence
        } else {
            Scope::State
        }
    }

    /// Verify that `combination` carries exactly the fields this kind declares.
    pub fn check(&self, combination: &Combination) -> Result<(), Error> {
        let context_ok = match combination.context {
            Context::State(_) => self.states,
            Context::Geofence(_) => self.geofence,
        };
        if combination.mode.is_some() != self.modes
            || combination.throttle.is_some() != self.throttle
            || !context_ok
        {
            return Err(Error::MalformedCombination(format!(
                "{combination} does not match {self:?}"
            )));
        }
        Ok(())
    }
}

/// Context axis a campaign is scoped against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Tests are triggered by vehicle states and may repeat across states.
    State,
    /// Tests are triggered by any status update and are globally exhausted once run.
    Geofence,
}

/// Unvalidated form of a [Specification], as written in configuration files.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Draft {
    drone: String,
    #[serde(default)]
    modes: Vec<Mode>,
    #[serde(default)]
    states: Vec<String>,
    #[serde(default)]
    geofence: Vec<GeofenceAction>,
    #[serde(default)]
    throttle: Vec<u8>,
}

/// A fuzz test scenario.
///
/// An empty list excludes its parameter from the campaign.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Draft", into = "Draft")]
pub struct Specification {
    drone: String,
    modes: Vec<Mode>,
    states: Vec<String>,
    geofence: Vec<GeofenceAction>,
    throttle: Vec<u8>,
    kind: Kind,
}

impl Specification {
    /// Create a new specification.
    ///
    /// Fails with [Error::InvalidSpec] unless exactly one of `states` and `geofence`
    /// is non-empty, or if a throttle level falls outside [THROTTLE_LEVELS].
    pub fn new(
        drone: impl Into<String>,
        modes: Vec<Mode>,
        states: Vec<String>,
        geofence: Vec<GeofenceAction>,
        throttle: Vec<u8>,
    ) -> Result<Self, Error> {
        match (states.is_empty(), geofence.is_empty()) {
            (true, true) => {
                return Err(Error::InvalidSpec(
                    "either states or geofence actions must be provided".into(),
                ))
            }
            (false, false) => {
                return Err(Error::InvalidSpec(
                    "states and geofence actions are mutually exclusive".into(),
                ))
            }
            _ => {}
        }
        if let Some(level) = throttle.iter().find(|l| !THROTTLE_LEVELS.contains(*l)) {
            return Err(Error::InvalidSpec(format!(
                "throttle level {level} outside {THROTTLE_LEVELS:?}"
            )));
        }
        let kind = Kind {
            modes: !modes.is_empty(),
            throttle: !throttle.is_empty(),
            states: !states.is_empty(),
            geofence: !geofence.is_empty(),
        };
        Ok(Self {
            drone: drone.into(),
            modes,
            states,
            geofence,
            throttle,
            kind,
        })
    }

    pub fn drone(&self) -> &str {
        &self.drone
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn geofence(&self) -> &[GeofenceAction] {
        &self.geofence
    }

    pub fn throttle(&self) -> &[u8] {
        &self.throttle
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }
}

impl TryFrom<Draft> for Specification {
    type Error = Error;

    fn try_from(draft: Draft) -> Result<Self, Self::Error> {
        Self::new(
            draft.drone,
            draft.modes,
            draft.states,
            draft.geofence,
            draft.throttle,
        )
    }
}

impl From<Specification> for Draft {
    fn from(spec: Specification) -> Self {
        Self {
            drone: spec.drone,
            modes: spec.modes,
            states: spec.states,
            geofence: spec.geofence,
            throttle: spec.throttle,
        }
    }
}

/// The context a [Combination] is tested in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Context {
    State(String),
    Geofence(GeofenceAction),
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::State(state) => f.write_str(state),
            Context::Geofence(action) => write!(f, "{}", action.code()),
        }
    }
}

/// A [Combination] without its context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<i32>,
}

/// Serialized form of a [Combination].
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Encoded {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    throttle: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geofence: Option<GeofenceAction>,
}

/// A single test case: one assignment of `(mode?, throttle?, context)`.
///
/// Throttle values are physical (already remapped from their level).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Encoded", into = "Encoded")]
pub struct Combination {
    pub mode: Option<Mode>,
    pub throttle: Option<i32>,
    pub context: Context,
}

impl Combination {
    /// The combination without its context.
    pub fn variant(&self) -> Variant {
        Variant {
            mode: self.mode,
            throttle: self.throttle,
        }
    }

    /// The state this combination is tested in, if state-scoped.
    pub fn state(&self) -> Option<&str> {
        match &self.context {
            Context::State(state) => Some(state),
            Context::Geofence(_) => None,
        }
    }
}

impl TryFrom<Encoded> for Combination {
    type Error = Error;

    fn try_from(encoded: Encoded) -> Result<Self, Self::Error> {
        let context = match (encoded.state, encoded.geofence) {
            (Some(state), None) => Context::State(state),
            (None, Some(action)) => Context::Geofence(action),
            _ => {
                return Err(Error::MalformedCombination(
                    "exactly one of state and geofence must be set".into(),
                ))
            }
        };
        Ok(Self {
            mode: encoded.mode,
            throttle: encoded.throttle,
            context,
        })
    }
}

impl From<Combination> for Encoded {
    fn from(combination: Combination) -> Self {
        let (state, geofence) = match combination.context {
            Context::State(state) => (Some(state), None),
            Context::Geofence(action) => (None, Some(action)),
        };
        Self {
            mode: combination.mode,
            throttle: combination.throttle,
            state,
            geofence,
        }
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        if let Some(mode) = &self.mode {
            write!(f, "{mode}, ")?;
        }
        if let Some(throttle) = &self.throttle {
            write!(f, "{throttle}, ")?;
        }
        write!(f, "{})", self.context)
    }
}

/// Every distinct [Combination] of a [Specification].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Space {
    kind: Kind,
    combinations: BTreeSet<Combination>,
}

impl Space {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    pub fn contains(&self, combination: &Combination) -> bool {
        self.combinations.contains(combination)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Combination> {
        self.combinations.iter()
    }

    /// Combinations tested in the given state.
    pub fn in_state<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a Combination> {
        self.combinations
            .iter()
            .filter(move |c| c.state() == Some(state))
    }
}

/// Expand `spec` into its combination space.
///
/// Fields appear in the fixed order `(mode, throttle, context)` and only if the
/// specification fuzzes them. When no modes are fuzzed, throttle levels are remapped
/// with the [DEFAULT_MODE] table but the mode is not added to the combination.
pub fn generate(spec: &Specification) -> Space {
    let modes: Vec<Option<Mode>> = if spec.modes.is_empty() {
        vec![None]
    } else {
        spec.modes.iter().copied().map(Some).collect()
    };
    let levels: Vec<Option<u8>> = if spec.throttle.is_empty() {
        vec![None]
    } else {
        spec.throttle.iter().copied().map(Some).collect()
    };
    let contexts: Vec<Context> = if spec.kind.geofence {
        spec.geofence.iter().copied().map(Context::Geofence).collect()
    } else {
        spec.states.iter().cloned().map(Context::State).collect()
    };

    let mut combinations = BTreeSet::new();
    for mode in &modes {
        for level in &levels {
            let throttle = level.map(|level| mode.unwrap_or(DEFAULT_MODE).throttle(level));
            for context in &contexts {
                combinations.insert(Combination {
                    mode: *mode,
                    throttle,
                    context: context.clone(),
                });
            }
        }
    }
    Space {
        kind: spec.kind,
        combinations,
    }
}
