/// Display version information
pub fn execute() {
    println!("tessera {}", tessera::node::info::SEMVER);
    println!("Data-availability validator node");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_execute() {
        execute();
    }
}
