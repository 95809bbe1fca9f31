//! ⚙️ System rules: Spotify Connect, Bluetooth, the device's name, service toggles.
//!
//! Fewer commas than the hardware rules, more fan-out. One `name` field becomes five
//! keys. Four checkboxes become four `y`/`n` letters. One dropdown becomes a single
//! letter that means something to the telnet server and nobody else.

use serde_json::{Map, Value};

use super::{CompositeRule, Evidence, FieldSet, Flow, Predicate, RuleYield};
use crate::document::{ConfigurationDocument, is_truthy};

const fn by_token(tokens: &'static [&'static str]) -> Predicate {
    Predicate {
        tokens,
        excluded_by: &[],
        evidence: Evidence::None,
    }
}

const fn standing(field: &'static [&'static str]) -> Predicate {
    Predicate {
        tokens: &[],
        excluded_by: &[],
        evidence: Evidence::Standing(FieldSet::AnyOf(field)),
    }
}

pub(crate) fn rules() -> Vec<CompositeRule> {
    vec![
        CompositeRule {
            subsystem: "cspot",
            output_key: Some("cspot_config"),
            claims: &["deviceName", "bitrate", "zeroConf"],
            predicate: Predicate {
                tokens: &["cspot"],
                excluded_by: &[],
                evidence: Evidence::Fallback(FieldSet::AnyOf(&["deviceName", "bitrate"])),
            },
            flow: Flow::Stop,
            build: build_cspot,
        },
        CompositeRule {
            subsystem: "bt_source",
            output_key: None,
            claims: &["sink_name", "pin_code"],
            predicate: by_token(&["bt_source", "bt-source"]),
            flow: Flow::Stop,
            build: build_bt_source,
        },
        CompositeRule {
            subsystem: "audio_general",
            output_key: None,
            claims: &["jack_behavior", "loudness"],
            predicate: by_token(&["cfg-audio-general"]),
            flow: Flow::Stop,
            build: build_audio_general,
        },
        // -- 🪜 the next three fall through: a name can ride along with any form
        CompositeRule {
            subsystem: "device_name",
            output_key: None,
            claims: &["name"],
            predicate: standing(&["name"]),
            flow: Flow::Continue,
            build: build_device_name,
        },
        CompositeRule {
            subsystem: "legacy_sink_name",
            output_key: None,
            claims: &["sink_name"],
            predicate: standing(&["sink_name"]),
            flow: Flow::Continue,
            build: build_legacy_sink_name,
        },
        CompositeRule {
            subsystem: "legacy_pin_code",
            output_key: None,
            claims: &["pin_code"],
            predicate: standing(&["pin_code"]),
            flow: Flow::Continue,
            build: build_legacy_pin_code,
        },
        CompositeRule {
            subsystem: "services",
            output_key: None,
            claims: &["cspot", "BT_Speaker", "AirPlay", "stats", "telnet"],
            predicate: by_token(&["services"]),
            flow: Flow::Stop,
            build: build_services,
        },
    ]
}

/// 🔢 C-style `atoi`: optional sign, leading digits, anything else is `0`.
fn lenient_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let magnitude = rest[..digits].parse::<i64>().unwrap_or(0);
    if negative { -magnitude } else { magnitude }
}

/// 🎧 The Spotify Connect settings are stored as a small JSON object, not a comma line.
fn build_cspot(doc: &ConfigurationDocument) -> RuleYield {
    let mut object = Map::new();
    if let Some(name) = doc.get_string("deviceName") {
        object.insert("deviceName".into(), Value::from(name.into_owned()));
    }
    if let Some(bitrate) = doc.get_string("bitrate") {
        object.insert("bitrate".into(), Value::from(lenient_int(&bitrate)));
    }
    if let Some(zero_conf) = doc.get_string("zeroConf") {
        object.insert("zeroConf".into(), Value::from(lenient_int(&zero_conf)));
    }
    if object.is_empty() {
        return RuleYield::default();
    }
    RuleYield::composite(Value::Object(object).to_string())
}

fn build_bt_source(doc: &ConfigurationDocument) -> RuleYield {
    let mut built = RuleYield::default();
    if let Some(sink_name) = doc.get_string("sink_name") {
        built = built.with_side_write("a2dp_sink_name", sink_name);
    }
    if let Some(pin_code) = doc.get_string("pin_code") {
        built = built.with_side_write("a2dp_spin", pin_code);
    }
    built
}

fn build_audio_general(doc: &ConfigurationDocument) -> RuleYield {
    let mut built = RuleYield::default();
    if let Some(jack) = doc.get_non_empty("jack_behavior") {
        let mutes_amp = if jack.eq_ignore_ascii_case("Headphones") { "y" } else { "n" };
        built = built.with_side_write("jack_mutes_amp", mutes_amp);
    }
    if let Some(loudness) = doc.get_non_empty("loudness") {
        built = built.with_side_write("loudness", loudness);
    }
    built
}

/// 🏷️ One name, five places the device introduces itself.
fn build_device_name(doc: &ConfigurationDocument) -> RuleYield {
    let Some(name) = doc.get_non_empty("name") else {
        return RuleYield::default();
    };
    RuleYield::default()
        .with_side_write("host_name", &*name)
        .with_side_write("name", &*name)
        .with_side_write("airplay_name", format!("ESP32-AirPlay-{name}"))
        .with_side_write("bt_name", format!("BT-{name}"))
        .with_side_write("ap_ssid", format!("squeezelite-{name}"))
}

fn build_legacy_sink_name(doc: &ConfigurationDocument) -> RuleYield {
    match doc.get_string("sink_name") {
        Some(sink_name) => RuleYield::default().with_side_write("a2dp_sink_name", sink_name),
        None => RuleYield::default(),
    }
}

fn build_legacy_pin_code(doc: &ConfigurationDocument) -> RuleYield {
    match doc.get_string("pin_code") {
        Some(pin_code) => RuleYield::default().with_side_write("a2dp_spin", pin_code),
        None => RuleYield::default(),
    }
}

fn yes_no(doc: &ConfigurationDocument, field: &str) -> &'static str {
    match doc.get_string(field) {
        Some(value) if is_truthy(&value) => "y",
        _ => "n",
    }
}

/// 📺 Telnet dropdown → the letter the console reads at boot.
fn telnet_mode(selection: Option<&str>) -> &'static str {
    match selection {
        Some(s) if s.eq_ignore_ascii_case("Telnet Only") => "Y",
        Some(s) if s.eq_ignore_ascii_case("Telnet and Serial") => "D",
        // -- "Disabled", empty, or something the UI never offered
        _ => "N",
    }
}

/// 🎚️ Checkboxes always produce a letter. An unchecked box is often just not sent.
fn build_services(doc: &ConfigurationDocument) -> RuleYield {
    let mut built = RuleYield::default()
        .with_side_write("enable_cspot", yes_no(doc, "cspot"))
        .with_side_write("enable_bt_sink", yes_no(doc, "BT_Speaker"))
        .with_side_write("enable_airplay", yes_no(doc, "AirPlay"))
        .with_side_write("stats", yes_no(doc, "stats"));
    if doc.has("telnet") {
        let selection = doc.get_string("telnet");
        built = built.with_side_write("telnet_enable", telnet_mode(selection.as_deref()));
    }
    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleSet, RuleWrite};
    use serde_json::json;

    fn run(config: Value) -> (Vec<RuleWrite>, ConfigurationDocument) {
        let mut the_doc = match config {
            Value::Object(map) => ConfigurationDocument::from_map(map),
            _ => panic!("💀 test fixture must be an object"),
        };
        let the_writes = RuleSet::standard()
            .apply(&mut the_doc)
            .into_iter()
            .flat_map(|outcome| outcome.writes)
            .collect();
        (the_writes, the_doc)
    }

    fn pairs(writes: &[RuleWrite]) -> Vec<(&str, &str)> {
        writes
            .iter()
            .map(|w| (&*w.key, w.value.as_str()))
            .collect()
    }

    #[test]
    fn the_one_where_telnet_and_serial_means_d() {
        let (the_writes, the_doc) = run(json!({
            "__cmdname__": "cfg-syst-services", "telnet": "Telnet and Serial"
        }));
        assert_eq!(
            pairs(&the_writes),
            vec![
                ("enable_cspot", "n"),
                ("enable_bt_sink", "n"),
                ("enable_airplay", "n"),
                ("stats", "n"),
                ("telnet_enable", "D"),
            ]
        );
        assert_eq!(the_doc.unconsumed().count(), 0);
    }

    #[test]
    fn the_one_where_checkboxes_arrive_wrapped() {
        let (the_writes, _) = run(json!({
            "__cmdname__": "cfg-syst-services",
            "cspot": {"value": "true", "type": 33},
            "BT_Speaker": {"value": "false", "type": 33},
            "AirPlay": {"value": 1, "type": 1},
            "stats": "Y"
        }));
        assert_eq!(
            pairs(&the_writes),
            vec![
                ("enable_cspot", "y"),
                ("enable_bt_sink", "n"),
                ("enable_airplay", "y"),
                ("stats", "y"),
            ]
        );
    }

    #[test]
    fn the_one_where_the_telnet_dropdown_has_three_answers_and_a_default() {
        assert_eq!(telnet_mode(Some("Disabled")), "N");
        assert_eq!(telnet_mode(Some("telnet only")), "Y");
        assert_eq!(telnet_mode(Some("TELNET AND SERIAL")), "D");
        assert_eq!(telnet_mode(Some("carrier pigeon")), "N");
        assert_eq!(telnet_mode(Some("")), "N");
        assert_eq!(telnet_mode(None), "N");
    }

    #[test]
    fn the_one_where_a_name_becomes_five_keys() {
        let (the_writes, _) = run(json!({"name": "LivingRoom"}));
        assert_eq!(
            pairs(&the_writes),
            vec![
                ("host_name", "LivingRoom"),
                ("name", "LivingRoom"),
                ("airplay_name", "ESP32-AirPlay-LivingRoom"),
                ("bt_name", "BT-LivingRoom"),
                ("ap_ssid", "squeezelite-LivingRoom"),
            ]
        );
    }

    #[test]
    fn the_one_where_a_blank_name_is_swallowed_silently() {
        let (the_writes, the_doc) = run(json!({"name": "", "volume": 50}));
        assert!(the_writes.is_empty());
        assert!(the_doc.is_consumed("name"));
        assert!(the_doc.has("volume"));
    }

    #[test]
    fn the_one_where_the_name_rides_along_with_the_services_form() {
        let (the_writes, the_doc) = run(json!({
            "__cmdname__": "cfg-syst-services", "name": "Den", "stats": 1
        }));
        let the_keys: Vec<_> = the_writes.iter().map(|w| &*w.key).collect();
        assert!(the_keys.contains(&"ap_ssid"));
        assert!(the_keys.contains(&"enable_cspot"));
        assert!(!the_keys.contains(&"telnet_enable"));
        assert_eq!(the_doc.unconsumed().count(), 0);
    }

    #[test]
    fn the_one_where_cspot_is_json_in_a_fixed_key_order() {
        let (the_writes, _) = run(json!({
            "__cmdname__": "cfg-syst-cspot",
            "zeroConf": "1", "bitrate": "320kbps", "deviceName": "Kitchen"
        }));
        assert_eq!(
            pairs(&the_writes),
            vec![("cspot_config", r#"{"deviceName":"Kitchen","bitrate":320,"zeroConf":1}"#)]
        );
    }

    #[test]
    fn the_one_where_legacy_cspot_forms_are_found_by_bitrate_alone() {
        let (the_writes, _) = run(json!({"bitrate": 160}));
        assert_eq!(pairs(&the_writes), vec![("cspot_config", r#"{"bitrate":160}"#)]);
    }

    #[test]
    fn the_one_where_atoi_is_forgiving() {
        assert_eq!(lenient_int("320"), 320);
        assert_eq!(lenient_int("  -96k"), -96);
        assert_eq!(lenient_int("+7"), 7);
        assert_eq!(lenient_int("high"), 0);
        assert_eq!(lenient_int(""), 0);
    }

    #[test]
    fn the_one_where_bt_source_stops_the_legacy_rules_from_writing_twice() {
        let (the_writes, the_doc) = run(json!({
            "__cmdname__": "cfg-audio-bt_source", "sink_name": "Speaker", "pin_code": "0000"
        }));
        assert_eq!(
            pairs(&the_writes),
            vec![("a2dp_sink_name", "Speaker"), ("a2dp_spin", "0000")]
        );
        assert_eq!(the_doc.unconsumed().count(), 0);
    }

    #[test]
    fn the_one_where_hintless_bluetooth_fields_still_find_their_keys() {
        let (the_writes, _) = run(json!({"pin_code": 1234, "sink_name": "Speaker"}));
        assert_eq!(
            pairs(&the_writes),
            vec![("a2dp_sink_name", "Speaker"), ("a2dp_spin", "1234")]
        );
    }

    #[test]
    fn the_one_where_jack_behavior_becomes_a_yes_or_no() {
        let (the_writes, _) = run(json!({
            "__cmdname__": "cfg-audio-general", "jack_behavior": "headphones", "loudness": 6
        }));
        assert_eq!(
            pairs(&the_writes),
            vec![("jack_mutes_amp", "y"), ("loudness", "6")]
        );

        let (the_writes, _) = run(json!({
            "__cmdname__": "cfg-audio-general", "jack_behavior": "Subwoofer", "loudness": ""
        }));
        assert_eq!(pairs(&the_writes), vec![("jack_mutes_amp", "n")]);
    }
}
