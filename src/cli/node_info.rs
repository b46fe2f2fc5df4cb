use tessera::node::NodeInfo;

/// Print the host information this node reports to dispersers
pub fn execute(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render(&NodeInfo::collect(), json)?);
    Ok(())
}

fn render(info: &NodeInfo, json: bool) -> Result<String, Box<dyn std::error::Error>> {
    if json {
        return Ok(serde_json::to_string_pretty(info)?);
    }
    Ok(format!(
        "Version: {}\nOS: {}\nArch: {}\nCPUs: {}\nMemory: {} bytes",
        info.semver, info.os, info.arch, info.num_cpu, info.mem_bytes
    ))
}
