//! 🔌 Hardware rules: buses, the display, audio interfaces, LEDs, the knob.
//!
//! Seven subsystems, seven composite strings. Each builder reads, each builder
//! decides, nobody writes to a store from in here.

use tracing::debug;

use super::{
    CompositeLine, CompositeRule, Evidence, FieldSet, Flow, Predicate, RuleYield, Sentinel,
    required,
};
use crate::document::{ConfigurationDocument, is_truthy};

const fn by_token(tokens: &'static [&'static str]) -> Predicate {
    Predicate {
        tokens,
        excluded_by: &[],
        evidence: Evidence::None,
    }
}

pub(crate) fn rules() -> Vec<CompositeRule> {
    vec![
        CompositeRule {
            subsystem: "i2c",
            output_key: Some("i2c_config"),
            claims: &["scl", "sda", "speed", "port"],
            predicate: by_token(&["i2c"]),
            flow: Flow::Stop,
            build: build_i2c,
        },
        CompositeRule {
            subsystem: "spi",
            output_key: Some("spi_config"),
            claims: &["data", "clk", "dc", "host"],
            predicate: by_token(&["spi"]),
            flow: Flow::Stop,
            build: build_spi,
        },
        CompositeRule {
            subsystem: "display",
            output_key: Some("display_config"),
            claims: &[
                "type", "width", "height", "cs", "reset", "back", "speed", "mode", "driver",
                "rotate", "hf", "vf", "invert", "address", "depth",
            ],
            predicate: by_token(&["display"]),
            flow: Flow::Stop,
            build: build_display,
        },
        CompositeRule {
            subsystem: "spdif",
            output_key: Some("spdif_config"),
            claims: &["clock", "wordselect", "data"],
            predicate: by_token(&["spdif"]),
            flow: Flow::Stop,
            build: build_spdif,
        },
        CompositeRule {
            subsystem: "dac",
            output_key: Some("dac_config"),
            claims: &[
                "clock",
                "wordselect",
                "data",
                "model_name",
                "mute_gpio",
                "mute_level",
                "dac_sda",
                "dac_scl",
                "dac_i2c",
            ],
            // -- ⚔️ spdif and dac share clock/wordselect/data: an spdif hint always wins
            predicate: Predicate {
                tokens: &["dac", "i2s"],
                excluded_by: &["spdif"],
                evidence: Evidence::Fallback(FieldSet::AllOf(&[
                    "clock",
                    "wordselect",
                    "model_name",
                ])),
            },
            flow: Flow::Stop,
            build: build_dac,
        },
        CompositeRule {
            subsystem: "led_vu",
            output_key: Some("led_vu_config"),
            claims: &["gpio", "length", "type", "scale"],
            predicate: by_token(&["ledvu", "led"]),
            flow: Flow::Stop,
            build: build_led_vu,
        },
        CompositeRule {
            subsystem: "rotary",
            output_key: Some("rotary_config"),
            claims: &[
                "A",
                "B",
                "SW",
                "volume_lock",
                "longpress",
                "knobonly",
                "timer",
                "raw_mode",
            ],
            predicate: Predicate {
                tokens: &["rotary"],
                excluded_by: &[],
                evidence: Evidence::Fallback(FieldSet::AllOf(&["A", "B"])),
            },
            flow: Flow::Stop,
            build: build_rotary,
        },
    ]
}

fn build_i2c(doc: &ConfigurationDocument) -> RuleYield {
    let Some([scl, sda]) = required(doc, ["scl", "sda"]) else {
        return RuleYield::default();
    };
    let mut line = CompositeLine::new();
    line.pair("scl", &scl).pair("sda", &sda);
    line.optional("speed", doc.get_string("speed").as_deref(), Sentinel::Empty);
    line.optional("port", doc.get_string("port").as_deref(), Sentinel::Empty);
    RuleYield::composite(line.finish())
}

fn build_spi(doc: &ConfigurationDocument) -> RuleYield {
    let Some([data, clk]) = required(doc, ["data", "clk"]) else {
        return RuleYield::default();
    };
    let mut line = CompositeLine::new();
    line.pair("data", &data).pair("clk", &clk);
    line.optional("dc", doc.get_string("dc").as_deref(), Sentinel::Empty);
    line.optional("host", doc.get_string("host").as_deref(), Sentinel::Empty);
    RuleYield::composite(line.finish())
}

/// 🖥️ `TYPE,width=W,height=H` plus whatever this particular panel needs.
///
/// `TYPE` is the bus (`I2C` or `SPI`); the bus decides which optionals apply.
fn build_display(doc: &ConfigurationDocument) -> RuleYield {
    let Some([kind, width, height]) = required(doc, ["type", "width", "height"]) else {
        return RuleYield::default();
    };
    let is_i2c = kind.eq_ignore_ascii_case("I2C");
    let is_spi = kind.eq_ignore_ascii_case("SPI");

    let mut line = CompositeLine::new();
    line.token(&kind).pair("width", &width).pair("height", &height);
    if is_i2c {
        line.optional("address", doc.get_string("address").as_deref(), Sentinel::Empty);
    }
    if is_spi {
        line.optional("cs", doc.get_string("cs").as_deref(), Sentinel::MinusOne);
    }
    line.optional("reset", doc.get_string("reset").as_deref(), Sentinel::MinusOne);
    line.optional("back", doc.get_string("back").as_deref(), Sentinel::MinusOne);
    if is_spi {
        line.optional("speed", doc.get_string("speed").as_deref(), Sentinel::Empty);
        line.optional("mode", doc.get_string("mode").as_deref(), Sentinel::Empty);
    }
    if line.optional("driver", doc.get_string("driver").as_deref(), Sentinel::DashDash) {
        if let Some(depth) = doc.get_string("depth").filter(|d| Sentinel::MinusOne.admits(d)) {
            line.suffix(&format!(":{depth}"));
        }
    }
    line.flag("HFlip", doc.get_string("hf").as_deref());
    line.flag("VFlip", doc.get_string("vf").as_deref());
    line.flag("rotate", doc.get_string("rotate").as_deref());
    line.flag("invert", doc.get_string("invert").as_deref());
    RuleYield::composite(line.finish())
}

fn build_spdif(doc: &ConfigurationDocument) -> RuleYield {
    match required(doc, ["clock", "wordselect", "data"]) {
        Some([bck, ws, dout]) => RuleYield::composite(format!("bck={bck},ws={ws},do={dout}")),
        None => RuleYield::default(),
    }
}

/// 🔊 I2S DAC: pins first, then mute GPIO with its active level, model, and the
/// optional control bus.
fn build_dac(doc: &ConfigurationDocument) -> RuleYield {
    let Some([bck, ws, dout]) = required(doc, ["clock", "wordselect", "data"]) else {
        return RuleYield::default();
    };
    let mut line = CompositeLine::new();
    line.pair("bck", &bck).pair("ws", &ws).pair("do", &dout);

    if line.optional("mute", doc.get_string("mute_gpio").as_deref(), Sentinel::MinusOne) {
        let active_high = doc.get_string("mute_level").is_some_and(|level| is_truthy(&level));
        line.suffix(if active_high { ":1" } else { ":0" });
    }
    line.optional("model", doc.get_string("model_name").as_deref(), Sentinel::DashDash);

    let sda = doc.get_string("dac_sda").filter(|v| Sentinel::MinusOne.admits(v));
    let scl = doc.get_string("dac_scl").filter(|v| Sentinel::MinusOne.admits(v));
    if let (Some(sda), Some(scl)) = (sda, scl) {
        line.pair("sda", &sda).pair("scl", &scl);
        line.optional("i2c", doc.get_string("dac_i2c").as_deref(), Sentinel::Empty);
    }
    RuleYield::composite(line.finish())
}

/// 🌈 No required fields here: any subset of the strip's settings is a valid line.
fn build_led_vu(doc: &ConfigurationDocument) -> RuleYield {
    let mut line = CompositeLine::new();
    line.optional("type", doc.get_string("type").as_deref(), Sentinel::DashDash);
    line.optional("gpio", doc.get_string("gpio").as_deref(), Sentinel::MinusOne);
    line.optional("length", doc.get_string("length").as_deref(), Sentinel::Zero);
    line.optional("scale", doc.get_string("scale").as_deref(), Sentinel::Empty);
    if line.is_empty() {
        debug!("🌑 led_vu had nothing worth saying");
        return RuleYield::default();
    }
    RuleYield::composite(line.finish())
}

fn build_rotary(doc: &ConfigurationDocument) -> RuleYield {
    let mut built = match required(doc, ["A", "B"]) {
        Some([a, b]) => {
            let mut line = CompositeLine::new();
            line.pair("A", &a).pair("B", &b);
            line.optional("SW", doc.get_string("SW").as_deref(), Sentinel::MinusOne);
            line.flag("volume_lock", doc.get_string("volume_lock").as_deref());
            line.flag("longpress", doc.get_string("longpress").as_deref());
            if line.flag("knobonly", doc.get_string("knobonly").as_deref()) {
                if let Some(timer) = doc.get_string("timer").filter(|t| Sentinel::Zero.admits(t)) {
                    line.suffix(&format!("={timer}"));
                }
            }
            RuleYield::composite(line.finish())
        }
        None => RuleYield::default(),
    };
    // -- 🎛️ raw mode stands on its own, knob or no knob
    if let Some(raw) = doc.get_string("raw_mode") {
        built = built.with_side_write("lms_ctrls_raw", if is_truthy(&raw) { "Y" } else { "N" });
    }
    built
}
