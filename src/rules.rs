//! Rule synthesizer: turns a flow and its path into switch install commands.
//!
//! A multi-switch flow with `n` hops (`2n` path nodes) yields `n + 1`
//! commands:
//!
//! ```text
//! ingress(src_switch) → intermediate(path[1]/path[2]) → … → egress(dst_switch)
//! ```
//!
//! Traffic travels between ingress and egress tagged with the flow's transit
//! vlan; customer vlans are only handled at the edges.

use crate::error::FlowError;
use crate::types::{
    CommandKind, Cookie, Flow, FlowCommand, OutputVlanType, RuleAction, RuleMatch, SwitchId,
};

/// Pick the customer vlan handling from the ingress and egress vlans.
pub fn choose_output_action(input_vlan: u16, output_vlan: u16) -> OutputVlanType {
    match (input_vlan, output_vlan) {
        (0, 0) => OutputVlanType::None,
        (0, _) => OutputVlanType::Push,
        (_, 0) => OutputVlanType::Pop,
        (_, _) => OutputVlanType::Replace,
    }
}

/// Build every install command for a flow, in install order.
///
/// One-switch flows produce a single command. Multi-switch flows produce
/// ingress, one intermediate command per transit switch, and egress; a
/// multi-switch flow without a path has nothing to install.
pub fn build_rules(flow: &Flow) -> Result<Vec<FlowCommand>, FlowError> {
    let output_action = choose_output_action(flow.src_vlan, flow.dst_vlan);
    if flow.is_one_switch() {
        return Ok(vec![one_switch_command(flow, output_action)]);
    }

    let nodes = &flow.flowpath.path;
    if nodes.is_empty() {
        return Ok(Vec::new());
    }
    // validates even length before anything is emitted
    flow.flowpath.hops()?;

    let mut commands = Vec::with_capacity(nodes.len() / 2 + 1);
    commands.push(ingress_command(flow, output_action)?);

    for i in (1..nodes.len() - 1).step_by(2) {
        let src = &nodes[i];
        let dst = &nodes[i + 1];
        if src.switch_id != dst.switch_id {
            tracing::error!(
                flowid = %flow.flowid,
                index = i,
                left = %src.switch_id,
                right = %dst.switch_id,
                "Found non-paired node in the flow path"
            );
            return Err(FlowError::PathInconsistency(format!(
                "non-paired nodes at {} and {} in flow {}: {} != {}",
                i,
                i + 1,
                flow.flowid,
                src.switch_id,
                dst.switch_id
            )));
        }
        commands.push(intermediate_command(
            &src.switch_id,
            src.port_no,
            dst.port_no,
            flow.transit_vlan,
            &flow.flowid,
            flow.cookie,
        ));
    }

    commands.push(egress_command(flow, output_action)?);
    Ok(commands)
}

/// Single rule of a flow that starts and ends on the same switch.
pub fn one_switch_command(flow: &Flow, output_action: OutputVlanType) -> FlowCommand {
    let mut actions = match output_action {
        OutputVlanType::None => Vec::new(),
        OutputVlanType::Push => vec![RuleAction::PushVlan(flow.dst_vlan)],
        OutputVlanType::Pop => vec![RuleAction::PopVlan],
        OutputVlanType::Replace => vec![RuleAction::SetVlan(flow.dst_vlan)],
    };
    actions.push(RuleAction::Output(flow.dst_port));

    FlowCommand {
        kind: CommandKind::OneSwitch,
        switch_id: flow.src_switch.clone(),
        flowid: flow.flowid.clone(),
        cookie: flow.cookie,
        meter_id: flow.meter_id,
        bandwidth: Some(flow.bandwidth),
        matcher: RuleMatch { in_port: flow.src_port, vlan: flow.src_vlan },
        output_vlan_type: output_action,
        actions,
    }
}

/// Ingress rule: tag customer traffic with the transit vlan and send it
/// along the first hop.
pub fn ingress_command(flow: &Flow, output_action: OutputVlanType) -> Result<FlowCommand, FlowError> {
    let first = flow.flowpath.path.first().ok_or_else(|| {
        FlowError::PathInconsistency(format!("flow {} has no path to build ingress from", flow.flowid))
    })?;

    let tag = if flow.src_vlan == 0 {
        RuleAction::PushVlan(flow.transit_vlan)
    } else {
        RuleAction::SetVlan(flow.transit_vlan)
    };

    Ok(FlowCommand {
        kind: CommandKind::Ingress,
        switch_id: flow.src_switch.clone(),
        flowid: flow.flowid.clone(),
        cookie: flow.cookie,
        meter_id: flow.meter_id,
        bandwidth: Some(flow.bandwidth),
        matcher: RuleMatch { in_port: flow.src_port, vlan: flow.src_vlan },
        output_vlan_type: output_action,
        actions: vec![tag, RuleAction::Output(first.port_no)],
    })
}

/// Transit rule: forward transit-vlan traffic from `in_port` to `out_port`.
pub fn intermediate_command(
    switch_id: &SwitchId,
    in_port: u32,
    out_port: u32,
    transit_vlan: u16,
    flowid: &str,
    cookie: Cookie,
) -> FlowCommand {
    FlowCommand {
        kind: CommandKind::Intermediate,
        switch_id: switch_id.clone(),
        flowid: flowid.to_string(),
        cookie,
        meter_id: None,
        bandwidth: None,
        matcher: RuleMatch { in_port, vlan: transit_vlan },
        output_vlan_type: OutputVlanType::None,
        actions: vec![RuleAction::Output(out_port)],
    }
}

/// Egress rule: restore the customer vlan and deliver to the flow's port.
pub fn egress_command(flow: &Flow, output_action: OutputVlanType) -> Result<FlowCommand, FlowError> {
    let last = flow.flowpath.path.last().ok_or_else(|| {
        FlowError::PathInconsistency(format!("flow {} has no path to build egress from", flow.flowid))
    })?;

    let restore = match output_action {
        OutputVlanType::Push | OutputVlanType::Replace => RuleAction::SetVlan(flow.dst_vlan),
        OutputVlanType::Pop | OutputVlanType::None => RuleAction::PopVlan,
    };

    Ok(FlowCommand {
        kind: CommandKind::Egress,
        switch_id: flow.dst_switch.clone(),
        flowid: flow.flowid.clone(),
        cookie: flow.cookie,
        meter_id: None,
        bandwidth: None,
        matcher: RuleMatch { in_port: last.port_no, vlan: flow.transit_vlan },
        output_vlan_type: output_action,
        actions: vec![restore, RuleAction::Output(flow.dst_port)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowPath, PathNode};
    use proptest::prelude::*;

    fn make_flow(src: &str, dst: &str, path: Vec<PathNode>) -> Flow {
        Flow {
            flowid: "f1".to_string(),
            cookie: Cookie::new(0x4000_0000_0000_0001),
            meter_id: Some(7),
            bandwidth: 100,
            ignore_bandwidth: false,
            src_switch: src.into(),
            src_port: 10,
            src_vlan: 100,
            dst_switch: dst.into(),
            dst_port: 20,
            dst_vlan: 0,
            transit_vlan: 3000,
            description: String::new(),
            last_updated: 0,
            flowpath: FlowPath::new(path),
            state: None,
        }
    }

    fn linear_path(switches: usize) -> Vec<PathNode> {
        // s1:1 -> s2:2, s2:3 -> s3:4, ...
        let mut nodes = Vec::new();
        let mut seq = 0;
        for hop in 1..switches {
            nodes.push(PathNode::new(format!("s{}", hop), (2 * hop - 1) as u32, seq));
            nodes.push(PathNode::new(format!("s{}", hop + 1), (2 * hop) as u32, seq + 1));
            seq += 2;
        }
        nodes
    }

    #[test]
    fn test_output_action_table() {
        assert_eq!(choose_output_action(0, 0), OutputVlanType::None);
        assert_eq!(choose_output_action(0, 5), OutputVlanType::Push);
        assert_eq!(choose_output_action(5, 0), OutputVlanType::Pop);
        assert_eq!(choose_output_action(5, 6), OutputVlanType::Replace);
    }

    #[test]
    fn test_one_switch_flow() {
        let mut flow = make_flow("s1", "s1", vec![]);
        flow.dst_vlan = 200;
        let rules = build_rules(&flow).unwrap();

        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.kind, CommandKind::OneSwitch);
        assert_eq!(rule.meter_id, Some(7));
        assert_eq!(rule.output_vlan_type, OutputVlanType::Replace);
        assert_eq!(rule.actions, vec![RuleAction::SetVlan(200), RuleAction::Output(20)]);
    }

    #[test]
    fn test_three_switch_flow() {
        let flow = make_flow("s1", "s3", linear_path(3));
        let rules = build_rules(&flow).unwrap();

        let kinds: Vec<_> = rules.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![CommandKind::Ingress, CommandKind::Intermediate, CommandKind::Egress]);

        let ingress = &rules[0];
        assert_eq!(ingress.switch_id.as_str(), "s1");
        assert_eq!(ingress.matcher, RuleMatch { in_port: 10, vlan: 100 });
        assert_eq!(ingress.actions, vec![RuleAction::SetVlan(3000), RuleAction::Output(1)]);

        let transit = &rules[1];
        assert_eq!(transit.switch_id.as_str(), "s2");
        assert_eq!(transit.matcher, RuleMatch { in_port: 2, vlan: 3000 });
        assert_eq!(transit.output_port(), Some(3));
        assert_eq!(transit.meter_id, None);

        let egress = &rules[2];
        assert_eq!(egress.switch_id.as_str(), "s3");
        assert_eq!(egress.matcher, RuleMatch { in_port: 4, vlan: 3000 });
        assert_eq!(egress.output_vlan_type, OutputVlanType::Pop);
        assert_eq!(egress.actions, vec![RuleAction::PopVlan, RuleAction::Output(20)]);
    }

    #[test]
    fn test_untagged_ingress_pushes_transit_vlan() {
        let mut flow = make_flow("s1", "s2", linear_path(2));
        flow.src_vlan = 0;
        flow.dst_vlan = 300;
        let rules = build_rules(&flow).unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].actions[0], RuleAction::PushVlan(3000));
        assert_eq!(rules[1].actions[0], RuleAction::SetVlan(300));
    }

    #[test]
    fn test_odd_path_fails() {
        let mut path = linear_path(3);
        path.pop();
        let flow = make_flow("s1", "s3", path);
        assert!(matches!(build_rules(&flow), Err(FlowError::PathInconsistency(_))));
    }

    #[test]
    fn test_non_paired_transit_nodes_fail() {
        let mut path = linear_path(3);
        path[2].switch_id = "s9".into();
        let flow = make_flow("s1", "s3", path);
        assert!(matches!(build_rules(&flow), Err(FlowError::PathInconsistency(_))));
    }

    #[test]
    fn test_multi_switch_without_path_installs_nothing() {
        let flow = make_flow("s1", "s2", vec![]);
        assert!(build_rules(&flow).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_rule_count_is_hops_plus_one(switches in 2usize..12) {
            let flow = make_flow("s1", &format!("s{}", switches), linear_path(switches));
            let hops = flow.flowpath.path.len() / 2;
            let rules = build_rules(&flow).unwrap();
            prop_assert_eq!(rules.len(), hops + 1);
            prop_assert_eq!(rules.iter().filter(|r| r.kind == CommandKind::Intermediate).count(), hops - 1);
        }
    }
}
