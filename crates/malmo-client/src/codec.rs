//! Action encoding and observation decoding against declared spaces.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use malmo_core::error::{InvalidActionError, ProtocolError};
use malmo_core::types::{
    Action, ActionValue, Frame, FrameGeometry, Info, Observation, Space,
};

/// Observation field carrying the point-of-view frame.
pub const POV: &str = "pov";

/// Observation field folded from a list of item stacks.
pub const INVENTORY: &str = "inventory";

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

fn join_numbers(values: &[f64]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn encode_field(
    field: &str,
    value: &ActionValue,
    space: &Space,
) -> Result<String, InvalidActionError> {
    match space {
        Space::Enum { values } => match value {
            ActionValue::Index(index) => usize::try_from(*index)
                .ok()
                .and_then(|i| values.get(i))
                .cloned()
                .ok_or_else(|| InvalidActionError::IndexOutOfRange {
                    field: field.to_owned(),
                    index: *index,
                    len: values.len(),
                }),
            ActionValue::Text(text) if values.contains(text) => Ok(text.clone()),
            ActionValue::Text(text) => Err(InvalidActionError::NotEnumMember {
                field: field.to_owned(),
                value: text.clone(),
            }),
            ActionValue::Number(_) | ActionValue::Numbers(_) => Err(
                InvalidActionError::EnumExpectsIndexOrString(field.to_owned()),
            ),
        },
        Space::Box { .. } => match value {
            ActionValue::Index(v) => Ok(v.to_string()),
            ActionValue::Number(v) => Ok(v.to_string()),
            ActionValue::Numbers(v) => Ok(join_numbers(v)),
            ActionValue::Text(text) => Err(InvalidActionError::StringForContinuous {
                field: field.to_owned(),
                value: text.clone(),
            }),
        },
        Space::Dict { .. } => Err(InvalidActionError::NestedField(field.to_owned())),
    }
}

/// Render an action as the backend's command text: one `field value` line
/// per action field, in the action's order.
///
/// Enumeration indices are sent as the member they select. Fields missing
/// from the action are not checked; the backend applies its own no-op.
pub fn encode_action(action: &Action, space: &Space) -> Result<String, InvalidActionError> {
    let mut lines = Vec::with_capacity(action.len());
    for (field, value) in action.iter() {
        let sub = space
            .get(field)
            .ok_or_else(|| InvalidActionError::UnknownField(field.to_owned()))?;
        lines.push(format!("{field} {}", encode_field(field, value, sub)?));
    }
    Ok(lines.join("\n"))
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

#[allow(clippy::cast_possible_truncation)]
fn stack_quantity(stack: &Value) -> Option<i64> {
    let quantity = stack.get("quantity")?;
    quantity
        .as_i64()
        .or_else(|| quantity.as_f64().filter(|q| q.is_finite()).map(|q| q as i64))
}

/// Fold a list of `{type, quantity}` stacks into counts over the declared
/// item types. Unknown types are ignored and absent types count zero.
/// Fractional quantities are truncated.
pub fn fold_inventory(stacks: &Value, items: &BTreeMap<String, Space>) -> Value {
    let mut counts: BTreeMap<&str, i64> = items.keys().map(|k| (k.as_str(), 0)).collect();
    for stack in stacks.as_array().into_iter().flatten() {
        let (Some(kind), Some(quantity)) = (
            stack.get("type").and_then(Value::as_str),
            stack_quantity(stack),
        ) else {
            debug!(%stack, "skipping malformed inventory stack");
            continue;
        };
        if let Some(count) = counts.get_mut(kind) {
            *count += quantity;
        }
    }
    Value::Object(
        counts
            .into_iter()
            .map(|(k, v)| (k.to_owned(), Value::from(v)))
            .collect(),
    )
}

/// Parse an info payload. Empty text is an empty mapping.
pub fn parse_info(info: &str) -> Result<Info, ProtocolError> {
    if info.trim().is_empty() {
        return Ok(Info::new());
    }
    Ok(serde_json::from_str(info)?)
}

/// Decode raw frame bytes and an info payload into an observation.
///
/// An empty frame decodes to zeros. Every declared field other than `pov` is
/// taken from the info payload, or from the space's zeroed sample when the
/// backend left it out. Undeclared info fields are dropped.
pub fn decode_observation(
    raw: Vec<u8>,
    info: &str,
    space: &Space,
    geometry: FrameGeometry,
) -> Result<Observation, ProtocolError> {
    let pov = if raw.is_empty() {
        Frame::zeros(geometry)
    } else {
        Frame::from_bytes(geometry, raw)?
    };

    let mut info = parse_info(info)?;
    let mut fields = BTreeMap::new();
    for (name, sub) in space.spaces().into_iter().flatten() {
        if name == POV {
            continue;
        }
        let value = match (name.as_str(), info.remove(name), sub.spaces()) {
            (INVENTORY, Some(stacks), Some(items)) if stacks.is_array() => {
                fold_inventory(&stacks, items)
            }
            (_, Some(value), _) => value,
            (_, None, _) => {
                debug!(field = %name, "observation field missing, using zeroed sample");
                sub.zeroed_sample()
            }
        };
        fields.insert(name.clone(), value);
    }
    Ok(Observation { pov, fields })
}

/// Observation with a zero frame and zeroed samples for every declared field.
pub fn zeroed_observation(space: &Space, geometry: FrameGeometry) -> Observation {
    let fields = space
        .spaces()
        .into_iter()
        .flatten()
        .filter(|(name, _)| name.as_str() != POV)
        .map(|(name, sub)| (name.clone(), sub.zeroed_sample()))
        .collect();
    Observation {
        pov: Frame::zeros(geometry),
        fields,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use malmo_test_utils::fixtures::{navigate_action_space, navigate_observation_space};
    use malmo_test_utils::replies;
    use serde_json::json;

    const GEOMETRY: FrameGeometry = FrameGeometry::new(4, 2, 3);

    // ---- Actions ----

    #[test]
    fn encodes_in_action_order() {
        let action = Action::new()
            .with("jump", 1)
            .with("camera", vec![0.0, 1.5])
            .with("place", "dirt");
        let command = encode_action(&action, &navigate_action_space()).unwrap();
        assert_eq!(command, "jump 1\ncamera 0 1.5\nplace dirt");
    }

    #[test]
    fn enum_index_and_member_are_equivalent() {
        let space = navigate_action_space();
        let by_index = encode_action(&Action::new().with("place", 1), &space).unwrap();
        let by_name = encode_action(&Action::new().with("place", "dirt"), &space).unwrap();
        assert_eq!(by_index, by_name);
    }

    #[test]
    fn rejects_non_member_string() {
        let err = encode_action(&Action::new().with("place", "lava"), &navigate_action_space())
            .unwrap_err();
        assert_eq!(
            err,
            InvalidActionError::NotEnumMember {
                field: "place".into(),
                value: "lava".into()
            }
        );
    }

    #[test]
    fn rejects_out_of_range_index() {
        let space = navigate_action_space();
        for index in [2, -1] {
            let err = encode_action(&Action::new().with("place", index), &space).unwrap_err();
            assert!(matches!(err, InvalidActionError::IndexOutOfRange { len: 2, .. }));
        }
    }

    #[test]
    fn rejects_number_for_enum() {
        let err = encode_action(&Action::new().with("jump", 1.0), &navigate_action_space())
            .unwrap_err();
        assert!(matches!(err, InvalidActionError::EnumExpectsIndexOrString(_)));
    }

    #[test]
    fn rejects_string_for_box() {
        let err = encode_action(&Action::new().with("camera", "left"), &navigate_action_space())
            .unwrap_err();
        assert!(matches!(err, InvalidActionError::StringForContinuous { .. }));
    }

    #[test]
    fn rejects_unknown_and_nested_fields() {
        let space = Space::dict([("inventory", Space::dict([("dirt", Space::count(1.0))]))]);
        assert!(matches!(
            encode_action(&Action::new().with("fly", 1), &space),
            Err(InvalidActionError::UnknownField(_))
        ));
        assert!(matches!(
            encode_action(&Action::new().with("inventory", 1), &space),
            Err(InvalidActionError::NestedField(_))
        ));
    }

    #[test]
    fn empty_action_is_empty_command() {
        assert_eq!(encode_action(&Action::new(), &navigate_action_space()).unwrap(), "");
    }

    // ---- Observations ----

    #[test]
    fn empty_decode_never_fails() {
        let space = navigate_observation_space(4, 2);
        let obs = decode_observation(Vec::new(), "", &space, GEOMETRY).unwrap();
        assert_eq!(obs.pov, Frame::zeros(GEOMETRY));
        assert_eq!(obs.get("inventory"), Some(&json!({"dirt": 0, "log": 0})));
        assert_eq!(obs.get("compassAngle"), Some(&json!(0.0)));
        assert!(obs.get("pov").is_none());
    }

    #[test]
    fn frame_bytes_are_kept() {
        let raw = replies::gradient_frame(GEOMETRY);
        let obs = decode_observation(raw.clone(), "{}", &Space::default(), GEOMETRY).unwrap();
        assert_eq!(obs.pov.shape(), [2, 4, 3]);
        assert_eq!(obs.pov.as_bytes(), raw.as_slice());
    }

    #[test]
    fn wrong_frame_size_is_protocol_error() {
        let err = decode_observation(vec![0; 5], "", &Space::default(), GEOMETRY).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameSize { expected: 24, got: 5 }));
    }

    #[test]
    fn missing_field_yields_zero_sample() {
        let space = navigate_observation_space(4, 2);
        let info = r#"{"compassAngle": 12.5}"#;
        let obs = decode_observation(Vec::new(), info, &space, GEOMETRY).unwrap();
        assert_eq!(obs.get("compassAngle"), Some(&json!(12.5)));
        assert_eq!(obs.get("inventory"), Some(&json!({"dirt": 0, "log": 0})));
    }

    #[test]
    fn inventory_is_folded_over_declared_items() {
        let space = navigate_observation_space(4, 2);
        let info = json!({
            "inventory": [
                {"type": "dirt", "quantity": 3},
                {"type": "diamond", "quantity": 1},
                {"type": "dirt", "quantity": 2},
                {"quantity": 9}
            ],
            "extra": true
        })
        .to_string();
        let obs = decode_observation(Vec::new(), &info, &space, GEOMETRY).unwrap();
        assert_eq!(obs.get("inventory"), Some(&json!({"dirt": 5, "log": 0})));
        assert!(obs.get("extra").is_none());
    }

    #[test]
    fn float_quantities_are_counted() {
        let space = navigate_observation_space(4, 2);
        let info = json!({
            "inventory": [
                {"type": "log", "quantity": 2.0},
                {"type": "log", "quantity": 1},
                {"type": "dirt", "quantity": "many"}
            ]
        })
        .to_string();
        let obs = decode_observation(Vec::new(), &info, &space, GEOMETRY).unwrap();
        assert_eq!(obs.get("inventory"), Some(&json!({"dirt": 0, "log": 3})));
    }

    #[test]
    fn malformed_info_is_protocol_error() {
        let err = decode_observation(Vec::new(), "{not json", &Space::default(), GEOMETRY)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidInfo(_)));
    }

    #[test]
    fn zeroed_observation_matches_empty_decode() {
        let space = navigate_observation_space(4, 2);
        assert_eq!(
            zeroed_observation(&space, GEOMETRY),
            decode_observation(Vec::new(), "", &space, GEOMETRY).unwrap()
        );
    }
}
