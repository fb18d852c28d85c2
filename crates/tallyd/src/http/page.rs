// ── Settings page ──
//
// Server-rendered HTML for the root page and the save responses. Field
// names match what `apply_form` reads.

use std::fmt::Write;

use tally_config::Settings;
use tally_core::Appliance;

const STYLE: &str = "body{font-family:Arial,sans-serif;margin:20px;background:#1a1a2e;color:#eee}\
.container{max-width:500px;margin:0 auto}h1{color:#00d4ff;text-align:center}\
.card{background:#16213e;padding:20px;border-radius:10px;margin-bottom:20px}\
.card h2{margin-top:0;color:#00d4ff;border-bottom:1px solid #0f3460;padding-bottom:10px}\
label{display:block;margin:10px 0 5px;font-weight:bold}\
input,select{width:100%;padding:10px;border:1px solid #0f3460;border-radius:5px;\
background:#0f3460;color:#eee;box-sizing:border-box}\
button{width:100%;padding:15px;background:#00d4ff;color:#1a1a2e;border:none;border-radius:5px;\
font-size:16px;font-weight:bold;cursor:pointer;margin-top:20px}\
.btns{display:flex;gap:10px;margin-top:10px}.btns button{margin-top:0;padding:12px 8px;font-size:14px}\
.b-off{background:#333;color:#fff}.b-green{background:#0f0;color:#000}\
.b-red{background:#f00;color:#fff}.b-yellow{background:#ff0;color:#000}\
.status{background:#0f3460;padding:15px;border-radius:5px;margin-bottom:20px}\
.row{display:flex;justify-content:space-between;padding:5px 0}\
.tally-program{color:#0f0}.tally-preview{color:#f00}.tally-unselected{color:#ff0}.tally-off{color:#888}\
.note{font-size:12px;color:#888;margin-top:5px}";

const SCRIPT: &str = "function show(d){var e=document.getElementById('tally');\
e.textContent=d.tally;e.className='tally-'+d.tally.toLowerCase();}\
function testTally(s){fetch('/test?state='+s).then(r=>r.json()).then(show)}\
function relay(p){fetch(p).then(r=>r.json()).then(d=>{document.getElementById('relay').textContent=\
d.command+': '+d.succeeded+'/'+d.attempted+' devices'})}\
function scan(){fetch('/discover').then(r=>r.json()).then(d=>{document.getElementById('peers').innerHTML=\
d.peers.map(p=>'<div class=\"row\"><span>'+p.hostname+'</span><span>'+p.ip+\
(p.tsl_address==null?'':' #'+p.tsl_address)+'</span></div>').join('')||'none found'})}\
setInterval(function(){fetch('/status').then(r=>r.json()).then(d=>{show(d);\
document.getElementById('text').textContent=d.text||'-'})},2000);";

/// Escape text for an HTML body or a double-quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn head(title: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title><style>{STYLE}</style></head><body><div class=\"container\">"
    )
}

fn row(out: &mut String, label: &str, value: &str, id: Option<&str>) {
    let id = id.map(|id| format!(" id=\"{id}\"")).unwrap_or_default();
    let _ = write!(
        out,
        "<div class=\"row\"><span>{label}</span><span{id}>{}</span></div>",
        escape(value)
    );
}

fn input(out: &mut String, name: &str, label: &str, kind: &str, value: &str) {
    let _ = write!(
        out,
        "<label for=\"{name}\">{label}</label>\
         <input type=\"{kind}\" id=\"{name}\" name=\"{name}\" value=\"{}\">",
        escape(value)
    );
}

fn select(out: &mut String, name: &str, label: &str, on: bool, labels: (&str, &str)) {
    let (yes, no) = if on {
        (" selected", "")
    } else {
        ("", " selected")
    };
    let _ = write!(
        out,
        "<label for=\"{name}\">{label}</label><select id=\"{name}\" name=\"{name}\">\
         <option value=\"1\"{yes}>{}</option><option value=\"0\"{no}>{}</option></select>",
        labels.0, labels.1
    );
}

/// The root page: live status, test and relay buttons, and the settings form.
pub fn index(appliance: &Appliance, settings: &Settings) -> String {
    let tally = appliance.state().tally();
    let summary = appliance.connectivity();
    let counters = appliance.listener_counters();
    let state = tally.state.to_string();

    let mut out = head("TSL Tally Configuration");
    out.push_str("<h1>TSL Tally Configuration</h1><div class=\"status\">");
    row(&mut out, "Device:", appliance.hostname(), None);
    row(&mut out, "Connection:", &summary.label(), None);
    row(&mut out, "IP Address:", &summary.active_ip().to_string(), None);
    let _ = write!(
        out,
        "<div class=\"row\"><span>Tally State:</span>\
         <span id=\"tally\" class=\"tally-{}\">{state}</span></div>",
        state.to_lowercase()
    );
    let text = tally.text.as_str();
    row(&mut out, "TSL Text:", if text.is_empty() { "-" } else { text }, Some("text"));
    row(
        &mut out,
        "Packets:",
        &format!(
            "{} received, {} applied",
            counters.received, counters.applied
        ),
        None,
    );
    if let Some(ap) = &summary.access_point {
        row(&mut out, "AP SSID:", &ap.ssid, None);
    }
    out.push_str("</div>");

    out.push_str(
        "<div class=\"card\"><h2>Test Tally</h2><div class=\"btns\">\
         <button type=\"button\" class=\"b-off\" onclick=\"testTally(0)\">OFF</button>\
         <button type=\"button\" class=\"b-green\" onclick=\"testTally(1)\">GREEN</button>\
         <button type=\"button\" class=\"b-red\" onclick=\"testTally(2)\">RED</button>\
         <button type=\"button\" class=\"b-yellow\" onclick=\"testTally(3)\">YELLOW</button>\
         </div></div>",
    );

    out.push_str(
        "<div class=\"card\"><h2>All Devices</h2><div class=\"btns\">\
         <button type=\"button\" onclick=\"scan()\">Find</button>\
         <button type=\"button\" onclick=\"relay('/test-all?state=1')\">Green</button>\
         <button type=\"button\" onclick=\"relay('/test-all?state=0')\">Off</button>\
         <button type=\"button\" onclick=\"relay('/disco-all?duration=10')\">Disco</button>\
         <button type=\"button\" onclick=\"relay('/disco-stop-all')\">Stop</button>\
         </div><p id=\"relay\" class=\"note\"></p><div id=\"peers\"></div></div>",
    );

    out.push_str("<form action=\"/save\" method=\"POST\">");
    out.push_str("<div class=\"card\"><h2>TSL Settings</h2>");
    input(
        &mut out,
        "tslAddr",
        "TSL Address (0-126)",
        "number",
        &settings.tsl.address.to_string(),
    );
    input(&mut out, "tslMcast", "Multicast Address", "text", &settings.tsl.multicast);
    input(&mut out, "tslPort", "UDP Port", "number", &settings.tsl.port.to_string());
    input(
        &mut out,
        "maxBright",
        "Max Brightness (1-255)",
        "number",
        &settings.tsl.max_brightness.to_string(),
    );
    out.push_str("</div>");

    out.push_str("<div class=\"card\"><h2>WiFi</h2>");
    select(&mut out, "wifiEn", "WiFi", settings.wifi.enabled, ("Enabled", "Disabled"));
    input(&mut out, "wifiSSID", "SSID", "text", &settings.wifi.ssid);
    input(&mut out, "wifiPass", "Password", "password", "");
    out.push_str("<p class=\"note\">Leave the password empty to keep the stored one.</p></div>");

    out.push_str("<div class=\"card\"><h2>Network</h2>");
    input(&mut out, "hostname", "Hostname", "text", &settings.network.hostname);
    select(&mut out, "dhcp", "IP Mode", settings.network.dhcp, ("DHCP", "Static"));
    input(&mut out, "ip", "Static IP", "text", &settings.network.static_ip);
    input(&mut out, "gw", "Gateway", "text", &settings.network.gateway);
    input(&mut out, "sn", "Subnet Mask", "text", &settings.network.subnet);
    input(&mut out, "dns", "DNS Server", "text", &settings.network.dns);
    out.push_str("<p class=\"note\">The device restarts after saving.</p></div>");

    let _ = write!(
        out,
        "<button type=\"submit\">Save &amp; Restart</button></form></div>\
         <script>{SCRIPT}</script></body></html>"
    );
    out
}

pub fn saved() -> String {
    let mut out = head("Settings Saved");
    out.push_str(
        "<h1>Settings Saved!</h1><p>Device is restarting...</p>\
         <p>Reconnect to the device at its new address.</p></div></body></html>",
    );
    out
}

pub fn rejected(reason: &str) -> String {
    let mut out = head("Settings Rejected");
    let _ = write!(
        out,
        "<h1>Settings Rejected</h1><p>{}</p><p><a href=\"/\">Back</a></p></div></body></html>",
        escape(reason)
    );
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape("<CAM \"1\" & 'B'>"),
            "&lt;CAM &quot;1&quot; &amp; &#39;B&#39;&gt;"
        );
    }

    #[test]
    fn inputs_carry_escaped_values() {
        let mut out = String::new();
        input(&mut out, "hostname", "Hostname", "text", "a\"b");
        assert!(out.contains("name=\"hostname\" value=\"a&quot;b\""));
    }

    #[test]
    fn select_marks_current_choice() {
        let mut out = String::new();
        select(&mut out, "dhcp", "IP Mode", false, ("DHCP", "Static"));
        assert!(out.contains("<option value=\"0\" selected>Static"));
    }

    #[test]
    fn rejection_shows_reason() {
        assert!(rejected("invalid tsl.address: <200>").contains("&lt;200&gt;"));
    }
}
