use bcrypt::{hash, DEFAULT_COST};
use std::io::{self, Write};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🛡️  Support Chat - Admin Password Hash");
    println!("======================================");

    print!("Password: ");
    io::stdout().flush()?;
    let password = rpassword::read_password()?;

    if password.len() < 6 {
        eprintln!("❌ Password must be at least 6 characters long");
        return Ok(());
    }

    print!("Password (again): ");
    io::stdout().flush()?;
    let password_confirm = rpassword::read_password()?;

    if password != password_confirm {
        eprintln!("❌ Passwords don't match");
        return Ok(());
    }

    let password_hash = hash(&password, DEFAULT_COST)?;

    println!();
    println!("✅ Hash generated.");
    println!();
    println!("📝 Copy this line to your .env file:");
    println!("ADMIN_PASSWORD_HASH={}", password_hash);

    Ok(())
}
