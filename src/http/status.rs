//! `ProjectStatus` assembly and its four wire representations (spec §6):
//! protobuf (the canonical form), `json`, `xml`, `html`.

use serde::Serialize;

use crate::envelope::pledge::Pledge;
use crate::envelope::project::Project;
use crate::proto;

/// A point-in-time snapshot of a project's pledges, as returned by `GET`.
/// Pledges are pre-scrubbed by the caller depending on whether the request
/// carried a valid owner signature (spec §6).
pub struct ProjectStatus {
    pub project_id_hex: String,
    pub timestamp: u64,
    pub value_pledged_so_far: u64,
    pub pledges: Vec<Pledge>,
    pub claimed_by: Option<String>,
}

impl ProjectStatus {
    pub fn build(project: &Project, pledges: Vec<Pledge>, claimed_by: Option<String>, now_unix_secs: u64) -> Self {
        let value_pledged_so_far = pledges.iter().map(|p| p.total_input_value()).sum();
        ProjectStatus {
            project_id_hex: project.id_hex(),
            timestamp: now_unix_secs,
            value_pledged_so_far,
            pledges,
            claimed_by,
        }
    }

    pub fn to_protobuf(&self) -> Vec<u8> {
        use prost::Message as _;
        let message = proto::ProjectStatus {
            id: Some(self.project_id_hex.clone()),
            timestamp: Some(self.timestamp),
            value_pledged_so_far: Some(self.value_pledged_so_far),
            pledges: self.pledges.iter().map(pledge_to_proto).collect(),
            claimed_by: self.claimed_by.clone(),
        };
        message.encode_to_vec()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&JsonView::from(self)).unwrap_or_default()
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<projectStatus>\n");
        out.push_str(&format!("  <id>{}</id>\n", xml_escape(&self.project_id_hex)));
        out.push_str(&format!("  <timestamp>{}</timestamp>\n", self.timestamp));
        out.push_str(&format!("  <valuePledgedSoFar>{}</valuePledgedSoFar>\n", self.value_pledged_so_far));
        if let Some(claimed_by) = &self.claimed_by {
            out.push_str(&format!("  <claimedBy>{}</claimedBy>\n", xml_escape(claimed_by)));
        }
        out.push_str("  <pledges>\n");
        for pledge in &self.pledges {
            out.push_str("    <pledge>\n");
            out.push_str(&format!("      <id>{}</id>\n", xml_escape(&pledge.id_hex())));
            out.push_str(&format!("      <totalInputValue>{}</totalInputValue>\n", pledge.total_input_value()));
            out.push_str(&format!("      <scrubbed>{}</scrubbed>\n", pledge.is_scrubbed()));
            out.push_str("    </pledge>\n");
        }
        out.push_str("  </pledges>\n</projectStatus>\n");
        out
    }

    pub fn to_html(&self) -> String {
        let mut rows = String::new();
        for pledge in &self.pledges {
            rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                html_escape(&pledge.id_hex()),
                pledge.total_input_value(),
                pledge.is_scrubbed()
            ));
        }
        format!(
            "<!DOCTYPE html>\n<html><head><title>Project {id}</title></head><body>\n\
             <h1>Project {id}</h1>\n<p>Pledged so far: {value} sats</p>\n{claimed}\n\
             <table><thead><tr><th>Pledge</th><th>Value</th><th>Scrubbed</th></tr></thead>\n\
             <tbody>\n{rows}</tbody></table>\n</body></html>\n",
            id = html_escape(&self.project_id_hex),
            value = self.value_pledged_so_far,
            claimed = self
                .claimed_by
                .as_ref()
                .map(|c| format!("<p>Claimed by: {}</p>", html_escape(c)))
                .unwrap_or_default(),
            rows = rows,
        )
    }
}

#[derive(Serialize)]
struct JsonPledgeView {
    id: String,
    #[serde(rename = "totalInputValue")]
    total_input_value: u64,
    scrubbed: bool,
}

#[derive(Serialize)]
struct JsonView {
    id: String,
    timestamp: u64,
    #[serde(rename = "valuePledgedSoFar")]
    value_pledged_so_far: u64,
    pledges: Vec<JsonPledgeView>,
    #[serde(rename = "claimedBy", skip_serializing_if = "Option::is_none")]
    claimed_by: Option<String>,
}

impl From<&ProjectStatus> for JsonView {
    fn from(status: &ProjectStatus) -> Self {
        JsonView {
            id: status.project_id_hex.clone(),
            timestamp: status.timestamp,
            value_pledged_so_far: status.value_pledged_so_far,
            pledges: status
                .pledges
                .iter()
                .map(|p| JsonPledgeView { id: p.id_hex(), total_input_value: p.total_input_value(), scrubbed: p.is_scrubbed() })
                .collect(),
            claimed_by: status.claimed_by.clone(),
        }
    }
}

fn pledge_to_proto(pledge: &Pledge) -> proto::Pledge {
    use prost::Message as _;
    proto::Pledge::decode(pledge.encode().as_slice()).expect("Pledge::encode roundtrips through proto::Pledge")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn html_escape(s: &str) -> String {
    xml_escape(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::script::ScriptBuf;

    fn sample_project() -> Project {
        let details = crate::proto::ProjectDetails {
            time: Some(0),
            expires: None,
            network: Some("regtest".to_string()),
            outputs: vec![crate::proto::Output { amount: Some(100_000), script: Some(ScriptBuf::new().into_bytes()) }],
            memo: None,
            payment_url: None,
            merchant_data: None,
            extra_details: None,
        };
        use prost::Message as _;
        let envelope = crate::proto::Project { serialized_payment_details: Some(details.encode_to_vec()), signature: None };
        Project::parse(&envelope.encode_to_vec()).unwrap()
    }

    #[test]
    fn json_and_xml_carry_the_same_totals() {
        let project = sample_project();
        let status = ProjectStatus::build(&project, Vec::new(), None, 1_700_000_000);
        assert!(status.to_json().contains("\"valuePledgedSoFar\":0"));
        assert!(status.to_xml().contains("<valuePledgedSoFar>0</valuePledgedSoFar>"));
        assert!(status.to_html().contains("Pledged so far: 0 sats"));
    }
}
