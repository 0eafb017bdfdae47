//! Rule installer for an ONOS-style SDN controller REST API.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::FlowGuardError;
use super::rules::{BlockRequest, MatchCriterion, RuleHandle, RuleInstaller};

pub struct OnosRuleInstaller {
    agent: ureq::Agent,
    base_url: String,
    authorization: Option<String>,
}

impl OnosRuleInstaller {
    /// `base_url` is the controller root, e.g. `http://127.0.0.1:8181/onos/v1`.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: None,
        }
    }

    /// Sends the given `Authorization` header value with every request.
    pub fn with_authorization(mut self, value: &str) -> Self {
        self.authorization = Some(value.to_string());
        self
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let req = self.agent.request(method, url).set("Accept", "application/json");
        match &self.authorization {
            Some(auth) => req.set("Authorization", auth),
            None => req,
        }
    }
}

impl RuleInstaller for OnosRuleInstaller {
    fn install(&mut self, request: &BlockRequest) -> Result<RuleHandle> {
        let url = format!("{}/flows", self.base_url);
        let body = flow_request_body(request).to_string();

        let resp = self.request("POST", &url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .with_context(|| format!("POST {url}"))?;
        let text = resp.into_string().context("reading controller response")?;
        parse_flow_response(&text)
    }

    fn remove(&mut self, handle: &RuleHandle) -> Result<()> {
        let url = format!("{}/flows/{}/{}", self.base_url, handle.device_id, handle.rule_id);
        self.request("DELETE", &url)
            .call()
            .with_context(|| format!("DELETE {url}"))?;
        Ok(())
    }
}

fn criterion_json(c: &MatchCriterion) -> Value {
    match c {
        MatchCriterion::IpProto(proto) => json!({"type": "IP_PROTO", "protocol": proto}),
        MatchCriterion::TcpDst(port) => json!({"type": "TCP_DST", "tcpPort": port}),
        MatchCriterion::Ipv4Dst(ip) => json!({"type": "IPV4_DST", "ip": format!("{ip}/32")}),
        MatchCriterion::Ipv4Src(ip) => json!({"type": "IPV4_SRC", "ip": format!("{ip}/32")}),
    }
}

/// Builds the batch flow document for one block rule. An empty treatment
/// makes the switch drop matching packets.
pub fn flow_request_body(request: &BlockRequest) -> Value {
    let criteria: Vec<Value> = request.criteria().iter().map(criterion_json).collect();
    json!({
        "flows": [{
            "priority": request.priority,
            "timeout": request.timeout_secs,
            "isPermanent": request.permanent,
            "deviceId": request.device_id,
            "selector": { "criteria": criteria },
        }]
    })
}

/// Reads the rule handle from `flows[0]` of the controller's reply.
pub fn parse_flow_response(body: &str) -> Result<RuleHandle> {
    let doc: Value = serde_json::from_str(body).context("controller response is not JSON")?;
    let flow = doc
        .get("flows")
        .and_then(|f| f.get(0))
        .ok_or_else(|| FlowGuardError::RuleInstall("controller response has no flows".into()))?;

    let field = |name: &str| -> Result<String> {
        match flow.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(FlowGuardError::RuleInstall(format!("controller response is missing flows[0].{name}")).into()),
        }
    };

    Ok(RuleHandle { device_id: field("deviceId")?, rule_id: field("flowId")? })
}
