use super::open_store;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(false)?;
    println!("{}", store.device_id());
    Ok(())
}
