use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;

fn main() {
    println!("🔐 Support Chat - Secret Key Generator");
    println!("======================================");

    let mut jwt_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut jwt_key);

    let mut encryption_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut encryption_key);

    let mut api_key = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut api_key);

    println!();
    println!("Generated secure keys:");
    println!("JWT secret (base64): {}", STANDARD.encode(jwt_key));
    println!("Encryption key (hex): {}", hex::encode(encryption_key));
    println!("API key (hex):        {}", hex::encode(api_key));
    println!();
    println!("📝 Copy these lines to your .env file:");
    println!("JWT_SECRET={}", STANDARD.encode(jwt_key));
    println!("ENCRYPTION_KEY={}", hex::encode(encryption_key));
    println!("API_KEY={}", hex::encode(api_key));
}
