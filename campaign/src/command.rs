//! Translate [Combination]s into vehicle [Command]s.
//!
//! A [Template] is derived once from a specification's [Kind] and lists the command
//! slots every combination of that specification fills, in the same field order the
//! generator uses.

use crate::{
    spec::{Combination, Context, Kind, Mode},
    Error,
};
use serde::{Deserialize, Serialize};

/// Autopilot parameter holding the geofence breach action.
pub const GEOFENCE_ACTION_PARAM: &str = "GF_ACTION";

/// Autopilot parameter holding the maximum horizontal distance of the geofence.
pub const GEOFENCE_RADIUS_PARAM: &str = "GF_MAX_HOR_DIST";

/// Value of an autopilot parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub integer: i64,
    pub real: f64,
}

/// A single instruction for the vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetParam { param_id: String, value: ParamValue },
    SetMode { custom_mode: Mode },
    SetThrottle { throttle_value: i32 },
}

/// Ordered batch of [Action]s issued for one test.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub actions: Vec<Action>,
}

impl Command {
    /// Command that returns the vehicle to a safe state.
    ///
    /// Throttle is only reset when the campaign drives the throttle.
    pub fn safe_state(throttle: bool) -> Self {
        let mut actions = vec![Action::SetMode {
            custom_mode: Mode::AutoLand,
        }];
        if throttle {
            actions.push(Action::SetThrottle { throttle_value: 0 });
        }
        Self { actions }
    }

    /// Command that sets the geofence radius.
    pub fn geofence_radius(radius: f64) -> Self {
        Self {
            actions: vec![Action::SetParam {
                param_id: GEOFENCE_RADIUS_PARAM.to_string(),
                value: ParamValue {
                    integer: 0,
                    real: radius,
                },
            }],
        }
    }
}

/// Placeholder in a [Template].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// `set_param GF_ACTION`, filled from the geofence context.
    GeofenceAction,
    /// `set_mode`, filled from the mode field.
    Mode,
    /// `set_throttle`, filled from the throttle field.
    Throttle,
}

/// Command shape shared by every combination of a specification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    kind: Kind,
    slots: Vec<Slot>,
}

impl Template {
    /// Derive the template for specifications of `kind`.
    pub fn new(kind: Kind) -> Self {
        let mut slots = Vec::with_capacity(3);
        if kind.geofence {
            slots.push(Slot::GeofenceAction);
        }
        if kind.modes {
            slots.push(Slot::Mode);
        }
        if kind.throttle {
            slots.push(Slot::Throttle);
        }
        Self { kind, slots }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Fill every slot from `combination`.
    pub fn build(&self, combination: &Combination) -> Result<Command, Error> {
        self.kind.check(combination)?;
        let missing = |slot: Slot| {
            Error::MalformedCombination(format!("{combination} has no value for {slot:?}"))
        };
        let mut actions = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let action = match slot {
                Slot::GeofenceAction => {
                    let Context::Geofence(action) = &combination.context else {
                        return Err(missing(*slot));
                    };
                    Action::SetParam {
                        param_id: GEOFENCE_ACTION_PARAM.to_string(),
                        value: ParamValue {
                            integer: i64::from(action.code()),
                            real: 0.0,
                        },
                    }
                }
                Slot::Mode => Action::SetMode {
                    custom_mode: combination.mode.ok_or_else(|| missing(*slot))?,
                },
                Slot::Throttle => Action::SetThrottle {
                    throttle_value: combination.throttle.ok_or_else(|| missing(*slot))?,
                },
            };
            actions.push(action);
        }
        Ok(Command { actions })
    }
}

/// Fill `template` from `combination`.
pub fn build(combination: &Combination, template: &Template) -> Result<Command, Error> {
    template.build(combination)
}
